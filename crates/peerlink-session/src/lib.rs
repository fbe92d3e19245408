//! Signalling and session-lifecycle engine.
//!
//! A [`Peer`] supervises repeated session attempts against a signalling
//! relay. Each attempt owns a fresh [`SignallingClient`] (authenticated
//! WebSocket with signed envelopes) and a fresh WebRTC transport; a
//! role-driven state machine drives offer/answer/candidate exchange until
//! the peer-to-peer link is up, then the relay connection is dropped and
//! only the transport matters.

pub mod client;
pub mod credentials;
pub mod envelope;
pub mod error;
pub mod peer;
pub mod session;
pub mod transport;

pub use client::{ClientEvent, SignallingClient};
pub use credentials::Credentials;
pub use envelope::{Envelope, IceCandidate};
pub use error::SignalError;
pub use peer::{ConnectionState, Peer, PeerConfig};
pub use session::{Session, SessionEnd, SessionEvent};
pub use transport::{MediaSource, PeerTransport, TransportConfig, TransportEvent};

pub use peerlink_pairing::Role;
