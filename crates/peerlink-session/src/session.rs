//! Session state machine: one attempt from idle to terminal.
//!
//! Both roles share the candidate plumbing and transport supervision; the
//! role decides who produces the first session description. The machine
//! runs as a single select loop over signalling events, transport events
//! and cancellation, so every state change happens on one task.
//!
//! Once the transport reaches Connected the signalling client is closed;
//! the user observes `Connecting -> Connected -> Disconnected` and never
//! the internal teardown.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use peerlink_pairing::Role;

use crate::client::{ClientEvent, SignallingClient};
use crate::error::SignalError;
use crate::peer::ConnectionState;
use crate::transport::{PeerTransport, TransportEvent};

/// Why an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The established peer link closed normally.
    PeerClosed,
    /// The transport failed (during or after negotiation).
    PeerFailed,
    /// The signalling channel failed before the peer link was up.
    SignallingFailed,
    /// `disconnect()` was called.
    LocallyCancelled,
}

impl SessionEnd {
    /// The error-taxonomy view of this terminal reason. The supervisor's
    /// retry gate keys off [`SignalError::is_retryable`]; the precise
    /// underlying error was already delivered to the error sink during the
    /// attempt.
    pub fn error(self) -> SignalError {
        match self {
            SessionEnd::PeerClosed => {
                SignalError::TransportFailure("peer connection closed".to_string())
            }
            SessionEnd::PeerFailed => {
                SignalError::TransportFailure("peer connection failed".to_string())
            }
            SessionEnd::SignallingFailed => {
                SignalError::ConnectionLost("signalling channel ended".to_string())
            }
            SessionEnd::LocallyCancelled => SignalError::Cancelled,
        }
    }
}

/// What one attempt reports upward to the supervisor.
#[derive(Debug)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    StringMessage(String),
    BinaryMessage(Vec<u8>),
    Error(SignalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsmState {
    AwaitingPeerConnect,
    Negotiating,
    PeerEstablished,
}

/// One session attempt over a fresh client and transport.
pub struct Session {
    role: Role,
    client: SignallingClient,
    client_events: mpsc::Receiver<ClientEvent>,
    transport: PeerTransport,
    transport_events: mpsc::Receiver<TransportEvent>,
    events: mpsc::Sender<SessionEvent>,
    cancel: watch::Receiver<bool>,
}

impl Session {
    pub fn new(
        role: Role,
        client: SignallingClient,
        client_events: mpsc::Receiver<ClientEvent>,
        transport: PeerTransport,
        transport_events: mpsc::Receiver<TransportEvent>,
        events: mpsc::Sender<SessionEvent>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            role,
            client,
            client_events,
            transport,
            transport_events,
            events,
            cancel,
        }
    }

    /// Runs the attempt to a terminal state.
    pub async fn run(self) -> SessionEnd {
        let Session {
            role,
            mut client,
            mut client_events,
            transport,
            mut transport_events,
            events,
            mut cancel,
        } = self;

        let emit = |event: SessionEvent| {
            let events = events.clone();
            async move {
                let _ = events.send(event).await;
            }
        };

        emit(SessionEvent::StateChanged(ConnectionState::Connecting)).await;

        // The initiator's channel must exist before its offer is created so
        // the offer negotiates it; the responder adopts the remote one.
        if role == Role::Initiator {
            if let Err(e) = transport.open_data_channel().await {
                emit(SessionEvent::Error(e)).await;
                transport.close().await;
                return SessionEnd::PeerFailed;
            }
        }

        client.connect();

        let mut state = FsmState::AwaitingPeerConnect;
        let mut signalling_open = true;

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        client.disconnect();
                        transport.close().await;
                        return SessionEnd::LocallyCancelled;
                    }
                }

                event = client_events.recv(), if signalling_open => {
                    let Some(event) = event else {
                        signalling_open = false;
                        if state != FsmState::PeerEstablished {
                            transport.close().await;
                            return SessionEnd::SignallingFailed;
                        }
                        continue;
                    };
                    match event {
                        ClientEvent::PeerConnect => {
                            debug!(%role, "peer online");
                            if role == Role::Initiator && state == FsmState::AwaitingPeerConnect {
                                if transport.has_tracks() {
                                    if let Err(e) = transport.add_video_sender().await {
                                        emit(SessionEvent::Error(e)).await;
                                        client.disconnect();
                                        transport.close().await;
                                        return SessionEnd::PeerFailed;
                                    }
                                }
                                match transport.create_offer().await {
                                    Ok(offer) => {
                                        if let Err(e) = client.send_offer(&offer) {
                                            emit(SessionEvent::Error(e)).await;
                                            client.disconnect();
                                            transport.close().await;
                                            return SessionEnd::SignallingFailed;
                                        }
                                        debug!("offer sent");
                                        state = FsmState::Negotiating;
                                    }
                                    Err(e) => {
                                        emit(SessionEvent::Error(e)).await;
                                        client.disconnect();
                                        transport.close().await;
                                        return SessionEnd::PeerFailed;
                                    }
                                }
                            }
                        }
                        ClientEvent::Offer(offer) => {
                            if role != Role::Responder || state != FsmState::AwaitingPeerConnect {
                                warn!(%role, ?state, "ignoring unexpected offer");
                                continue;
                            }
                            let answered = async {
                                transport.set_remote_description(offer).await?;
                                let answer = transport.create_answer().await?;
                                client.send_answer(&answer)
                            }
                            .await;
                            match answered {
                                Ok(()) => {
                                    debug!("answer sent");
                                    state = FsmState::Negotiating;
                                }
                                Err(e) => {
                                    emit(SessionEvent::Error(e)).await;
                                    client.disconnect();
                                    transport.close().await;
                                    return SessionEnd::PeerFailed;
                                }
                            }
                        }
                        ClientEvent::Answer(answer) => {
                            if role != Role::Initiator || state != FsmState::Negotiating {
                                warn!(%role, ?state, "ignoring unexpected answer");
                                continue;
                            }
                            if let Err(e) = transport.set_remote_description(answer).await {
                                emit(SessionEvent::Error(e)).await;
                                client.disconnect();
                                transport.close().await;
                                return SessionEnd::PeerFailed;
                            }
                            debug!("answer applied");
                        }
                        ClientEvent::IceCandidate(candidate) => {
                            // A bad candidate is not fatal; the transport
                            // decides when the attempt is lost.
                            if let Err(e) = transport.add_ice_candidate(candidate).await {
                                emit(SessionEvent::Error(e)).await;
                            }
                        }
                        ClientEvent::PeerDisconnect => {
                            debug!("peer left the relay");
                        }
                        ClientEvent::Error(e) => {
                            if state == FsmState::PeerEstablished {
                                // Signalling is already being torn down;
                                // only the transport matters now.
                                continue;
                            }
                            emit(SessionEvent::Error(e)).await;
                            client.disconnect();
                            transport.close().await;
                            return SessionEnd::SignallingFailed;
                        }
                    }
                }

                event = transport_events.recv() => {
                    let Some(event) = event else {
                        client.disconnect();
                        return SessionEnd::PeerFailed;
                    };
                    match event {
                        TransportEvent::StateChange(RTCPeerConnectionState::Connected) => {
                            if state != FsmState::PeerEstablished {
                                info!("peer link established");
                                state = FsmState::PeerEstablished;
                                // The user hears Connected before any
                                // signalling teardown is observable.
                                emit(SessionEvent::StateChanged(ConnectionState::Connected)).await;
                                client.disconnect();
                            }
                        }
                        TransportEvent::StateChange(RTCPeerConnectionState::Failed) => {
                            let established = state == FsmState::PeerEstablished;
                            client.disconnect();
                            transport.close().await;
                            if established {
                                emit(SessionEvent::StateChanged(ConnectionState::Disconnected)).await;
                            } else {
                                emit(SessionEvent::Error(SignalError::TransportFailure(
                                    "peer connection failed".to_string(),
                                ))).await;
                            }
                            return SessionEnd::PeerFailed;
                        }
                        TransportEvent::StateChange(RTCPeerConnectionState::Closed) => {
                            let established = state == FsmState::PeerEstablished;
                            client.disconnect();
                            transport.close().await;
                            if established {
                                emit(SessionEvent::StateChanged(ConnectionState::Disconnected)).await;
                            }
                            return SessionEnd::PeerClosed;
                        }
                        TransportEvent::StateChange(other) => {
                            debug!(?other, "transport state");
                        }
                        TransportEvent::LocalCandidate(candidate) => {
                            if client.is_connected() {
                                if let Err(e) = client.send_ice_candidate(&candidate) {
                                    debug!("candidate not sent: {e}");
                                }
                            }
                        }
                        TransportEvent::StringMessage(message) => {
                            emit(SessionEvent::StringMessage(message)).await;
                        }
                        TransportEvent::BinaryMessage(message) => {
                            emit(SessionEvent::BinaryMessage(message)).await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_local_cancellation_blocks_the_retry_loop() {
        assert!(SessionEnd::PeerClosed.error().is_retryable());
        assert!(SessionEnd::PeerFailed.error().is_retryable());
        assert!(SessionEnd::SignallingFailed.error().is_retryable());
        assert!(!SessionEnd::LocallyCancelled.error().is_retryable());
    }

    #[test]
    fn cancellation_maps_to_the_cancelled_error() {
        assert!(matches!(
            SessionEnd::LocallyCancelled.error(),
            SignalError::Cancelled
        ));
    }
}
