//! Signalling client: one authenticated relay connection attempt.
//!
//! The client is a thin handle over an owned connection task. On
//! `connect()` it dials the relay, sends the auth message, then runs
//! exactly one reader task and one writer task until the attempt ends.
//! All socket writes funnel through the writer's queue, so frames go out
//! in enqueue order; decoded frames come back as [`ClientEvent`]s on the
//! receiver handed out at construction.
//!
//! The peer's nonce (learned from `peerConnect`) is published write-once
//! through a `OnceLock`, so enqueueing a signed message reads a stable
//! value without locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::credentials::Credentials;
use crate::envelope::{
    decode_payload, Envelope, IceCandidate, TYPE_ANSWER, TYPE_ICE_CANDIDATE, TYPE_OFFER,
    TYPE_PEER_CONNECT, TYPE_PEER_DISCONNECT,
};
use crate::error::SignalError;

/// Outbound frames queued for the writer.
const SEND_QUEUE_DEPTH: usize = 32;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Decoded relay traffic, delivered in receive order.
#[derive(Debug)]
pub enum ClientEvent {
    /// The paired device is online; its nonce has been recorded.
    PeerConnect,
    /// The paired device went away. Informational; the attempt continues.
    PeerDisconnect,
    Offer(RTCSessionDescription),
    Answer(RTCSessionDescription),
    IceCandidate(IceCandidate),
    /// Fatal for this attempt. The reader has already stopped.
    Error(SignalError),
}

/// Handle to one signalling connection attempt.
pub struct SignallingClient {
    url: String,
    credentials: Arc<dyn Credentials>,
    send_tx: mpsc::Sender<String>,
    send_rx: Option<mpsc::Receiver<String>>,
    event_tx: mpsc::Sender<ClientEvent>,
    remote_nonce: Arc<OnceLock<String>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
}

impl SignallingClient {
    /// Creates a client for one attempt. Does not connect. The returned
    /// receiver is the only event sink and must be consumed by the caller;
    /// it is registered here, before any task starts, so no event can be
    /// missed.
    pub fn new(
        url: impl Into<String>,
        credentials: Arc<dyn Credentials>,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = Self {
            url: url.into(),
            credentials,
            send_tx,
            send_rx: Some(send_rx),
            event_tx,
            remote_nonce: Arc::new(OnceLock::new()),
            shutdown_tx,
            shutdown_rx,
            connected: Arc::new(AtomicBool::new(false)),
        };
        (client, event_rx)
    }

    /// Starts the connection attempt and returns immediately. Errors are
    /// reported through the event channel.
    pub fn connect(&mut self) {
        let Some(send_rx) = self.send_rx.take() else {
            warn!("connect() called twice on one signalling attempt");
            return;
        };
        let conn = Connection {
            url: self.url.clone(),
            credentials: self.credentials.clone(),
            send_rx,
            event_tx: self.event_tx.clone(),
            remote_nonce: self.remote_nonce.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
            connected: self.connected.clone(),
        };
        tokio::spawn(conn.run());
    }

    /// Whether the reader/writer pair is currently alive.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Closes the socket and stops both loops. Idempotent; no error event
    /// is emitted for a local disconnect.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        self.connected.store(false, Ordering::Release);
    }

    pub fn send_offer(&self, offer: &RTCSessionDescription) -> Result<(), SignalError> {
        self.enqueue_signed(TYPE_OFFER, offer)
    }

    pub fn send_answer(&self, answer: &RTCSessionDescription) -> Result<(), SignalError> {
        self.enqueue_signed(TYPE_ANSWER, answer)
    }

    pub fn send_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), SignalError> {
        self.enqueue_signed(TYPE_ICE_CANDIDATE, candidate)
    }

    /// Signs the payload with the peer's nonce echoed and admits it to the
    /// send queue. Never blocks beyond queue admission.
    fn enqueue_signed<T: Serialize>(&self, msg_type: &str, payload: &T) -> Result<(), SignalError> {
        let remote_nonce = self.remote_nonce.get().map(String::as_str).unwrap_or("");
        let envelope =
            Envelope::signed(msg_type, payload, remote_nonce, self.credentials.as_ref())?;
        self.send_tx
            .try_send(envelope.to_wire()?)
            .map_err(|e| SignalError::ConnectionLost(format!("send queue: {e}")))
    }
}

/// State moved into the connection task.
struct Connection {
    url: String,
    credentials: Arc<dyn Credentials>,
    send_rx: mpsc::Receiver<String>,
    event_tx: mpsc::Sender<ClientEvent>,
    remote_nonce: Arc<OnceLock<String>>,
    shutdown_rx: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
}

impl Connection {
    async fn run(mut self) {
        let stream = match connect_async(self.url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                self.emit(ClientEvent::Error(SignalError::DialFailed(e.to_string())))
                    .await;
                return;
            }
        };
        debug!(url = %self.url, "signalling socket open");
        let (mut sink, ws_read) = stream.split();

        // Auth goes on the wire before the writer starts draining the
        // queue, so nothing can precede it.
        let local_nonce = self.credentials.generate_nonce();
        let token = self.credentials.generate_token();
        let auth = match Envelope::auth(&local_nonce, &token).and_then(|e| e.to_wire()) {
            Ok(frame) => frame,
            Err(e) => {
                self.emit(ClientEvent::Error(e)).await;
                return;
            }
        };
        if let Err(e) = sink.send(Message::Text(auth.into())).await {
            self.emit(ClientEvent::Error(SignalError::AuthSendFailed(e.to_string())))
                .await;
            return;
        }

        self.connected.store(true, Ordering::Release);

        // One writer, one reader; the reader signals the writer when it
        // stops so neither outlives the attempt.
        let (stop_tx, stop_rx) = watch::channel(false);
        let writer = tokio::spawn(write_loop(
            sink,
            self.send_rx,
            self.event_tx.clone(),
            self.shutdown_rx.clone(),
            stop_rx,
        ));

        read_loop(
            ws_read,
            local_nonce,
            self.credentials.clone(),
            self.remote_nonce.clone(),
            self.event_tx.clone(),
            self.shutdown_rx.clone(),
        )
        .await;

        let _ = stop_tx.send(true);
        self.connected.store(false, Ordering::Release);
        let _ = writer.await;
        debug!(url = %self.url, "signalling attempt finished");
    }

    async fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

/// Drains the send queue onto the socket. The single point of socket
/// writes for the attempt.
async fn write_loop(
    mut sink: WsSink,
    mut send_rx: mpsc::Receiver<String>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            frame = send_rx.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            let _ = event_tx
                                .send(ClientEvent::Error(SignalError::ConnectionLost(
                                    format!("write: {e}"),
                                )))
                                .await;
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

/// Reads and routes frames until a fatal error, server close or local
/// disconnect.
async fn read_loop(
    mut ws_read: WsStream,
    local_nonce: String,
    credentials: Arc<dyn Credentials>,
    remote_nonce: Arc<OnceLock<String>>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match route_frame(text.as_str(), &local_nonce, credentials.as_ref(), &remote_nonce) {
                            Ok(event) => {
                                if event_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = event_tx.send(ClientEvent::Error(e)).await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        if !*shutdown_rx.borrow() {
                            let _ = event_tx
                                .send(ClientEvent::Error(SignalError::ConnectionLost(
                                    "closed by server".to_string(),
                                )))
                                .await;
                        }
                        break;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary frames are not part of the protocol
                    Some(Err(e)) => {
                        let _ = event_tx
                            .send(ClientEvent::Error(SignalError::ConnectionLost(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
        }
    }
}

/// Decodes one frame into an event. Signed types are verified against the
/// nonce we sent in auth; any rejection is fatal to the attempt.
fn route_frame(
    text: &str,
    local_nonce: &str,
    credentials: &dyn Credentials,
    remote_nonce: &OnceLock<String>,
) -> Result<ClientEvent, SignalError> {
    let envelope = Envelope::parse(text)?;
    match envelope.msg_type.as_str() {
        TYPE_PEER_CONNECT => {
            let nonce = envelope.nonce.as_deref().unwrap_or("");
            if nonce.is_empty() {
                return Err(SignalError::ProtocolViolation(
                    "peerConnect carried an empty nonce".to_string(),
                ));
            }
            if remote_nonce.set(nonce.to_string()).is_err() {
                // Keep the nonce from the first peerConnect; signed sends
                // may already have echoed it.
                warn!("duplicate peerConnect; keeping the original peer nonce");
            }
            Ok(ClientEvent::PeerConnect)
        }
        TYPE_PEER_DISCONNECT => Ok(ClientEvent::PeerDisconnect),
        TYPE_OFFER => {
            let data = envelope.verify_signed(local_nonce, credentials)?;
            Ok(ClientEvent::Offer(decode_payload(data)?))
        }
        TYPE_ANSWER => {
            let data = envelope.verify_signed(local_nonce, credentials)?;
            Ok(ClientEvent::Answer(decode_payload(data)?))
        }
        TYPE_ICE_CANDIDATE => {
            let data = envelope.verify_signed(local_nonce, credentials)?;
            Ok(ClientEvent::IceCandidate(decode_payload(data)?))
        }
        other => Err(SignalError::ProtocolViolation(format!(
            "unknown message type '{other}'"
        ))),
    }
}
