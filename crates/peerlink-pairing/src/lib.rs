//! Pairing support for peerlink peers.
//!
//! A pairing is a long-lived relationship between two devices: an exchanged
//! ECDSA P-256 key pair, a signalling-server token and a role. This crate
//! covers the full pairing lifecycle: key generation and JWK interchange,
//! the out-of-band exchange through a pairing server, persistence, and the
//! per-session credentials derived from a stored pairing.

pub mod credentials;
pub mod crypto;
pub mod error;
pub mod pairing;
pub mod record;
pub mod server;
pub mod storage;

pub use credentials::SessionCredentials;
pub use crypto::{generate_nonce, EcdsaKeyPair, EcdsaPublicKey};
pub use error::PairingError;
pub use pairing::{Pairing, PairingResult, PendingPairing};
pub use record::{PairingRecord, Role};
pub use server::PairingServerClient;
pub use storage::{FilePairingStore, InMemoryPairingStore, PairingStore};
