//! Public peer API and session supervisor.
//!
//! A [`Peer`] keeps trying to reach its paired device: each attempt gets a
//! fresh signalling client and transport, and any end other than a local
//! `disconnect()` is retried after a constant one-second pause. User
//! listeners see only `Connecting -> Connected -> Disconnected`; retries are
//! silent apart from the attempt counter in the logs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use webrtc::data_channel::RTCDataChannel;

use crate::client::SignallingClient;
use crate::credentials::Credentials;
use crate::error::SignalError;
use crate::session::{Session, SessionEnd, SessionEvent};
use crate::transport::{self, MediaSource, PeerTransport, TransportConfig};

/// Pause between attempts. Keeps immediate failures from spinning.
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// The only connection states a user observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Peer configuration.
#[derive(Clone, Default)]
pub struct PeerConfig {
    /// Signalling relay URL (`ws://` or `wss://`).
    pub signalling_url: String,
    pub transport: TransportConfig,
}

type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type StringListener = Arc<dyn Fn(String) + Send + Sync>;
type BinaryListener = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(SignalError) + Send + Sync>;

/// Optional user callbacks. Each delivery runs on its own task so user
/// code cannot stall the engine.
#[derive(Clone, Default)]
struct Listeners {
    connection_state: Option<StateListener>,
    string_message: Option<StringListener>,
    binary_message: Option<BinaryListener>,
    error: Option<ErrorListener>,
}

impl Listeners {
    fn emit_state(&self, state: ConnectionState) {
        if let Some(listener) = &self.connection_state {
            let listener = listener.clone();
            tokio::spawn(async move { listener(state) });
        }
    }

    fn emit_string(&self, message: String) {
        if let Some(listener) = &self.string_message {
            let listener = listener.clone();
            tokio::spawn(async move { listener(message) });
        }
    }

    fn emit_binary(&self, message: Vec<u8>) {
        if let Some(listener) = &self.binary_message {
            let listener = listener.clone();
            tokio::spawn(async move { listener(message) });
        }
    }

    fn emit_error(&self, error: SignalError) {
        if let Some(listener) = &self.error {
            let listener = listener.clone();
            tokio::spawn(async move { listener(error) });
        }
    }
}

/// A connection (attempted or actual) to the paired device.
pub struct Peer {
    config: PeerConfig,
    sources: Vec<Arc<dyn MediaSource>>,
    listeners: Listeners,
    running: Arc<AtomicBool>,
    cancel: std::sync::Mutex<Option<watch::Sender<bool>>>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

impl Peer {
    pub fn new(config: PeerConfig, sources: Vec<Arc<dyn MediaSource>>) -> Self {
        Self {
            config,
            sources,
            listeners: Listeners::default(),
            running: Arc::new(AtomicBool::new(false)),
            cancel: std::sync::Mutex::new(None),
            data_channel: Arc::new(Mutex::new(None)),
        }
    }

    // Listener registration. Register before `connect()`; the supervisor
    // snapshots the set when it starts.

    pub fn on_connection_state_change(&mut self, f: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.listeners.connection_state = Some(Arc::new(f));
    }

    pub fn on_string_message(&mut self, f: impl Fn(String) + Send + Sync + 'static) {
        self.listeners.string_message = Some(Arc::new(f));
    }

    pub fn on_binary_message(&mut self, f: impl Fn(Vec<u8>) + Send + Sync + 'static) {
        self.listeners.binary_message = Some(Arc::new(f));
    }

    pub fn on_error(&mut self, f: impl Fn(SignalError) + Send + Sync + 'static) {
        self.listeners.error = Some(Arc::new(f));
    }

    /// Starts the supervisor. Idempotent: a running peer ignores the call.
    pub fn connect(&self, credentials: Arc<dyn Credentials>) {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("connect() ignored: already running");
            return;
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        *self.cancel.lock().unwrap() = Some(cancel_tx);

        let supervisor = Supervisor {
            config: self.config.clone(),
            sources: self.sources.clone(),
            listeners: self.listeners.clone(),
            credentials,
            running: self.running.clone(),
            data_channel: self.data_channel.clone(),
        };
        tokio::spawn(supervisor.run(cancel_rx));
    }

    /// Stops the current attempt and prevents further ones. The socket and
    /// transport close promptly; the state listener hears `Disconnected`.
    pub fn disconnect(&self) {
        let cancel = self.cancel.lock().unwrap().take();
        if let Some(cancel) = cancel {
            let _ = cancel.send(true);
        }
        self.running.store(false, Ordering::Release);
        self.listeners.emit_state(ConnectionState::Disconnected);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Sends a text message; silently dropped with no active channel.
    pub async fn send_string(&self, message: &str) {
        transport::send_string(&self.data_channel, message).await;
    }

    /// Sends a binary message; silently dropped with no active channel.
    pub async fn send_binary(&self, message: &[u8]) {
        transport::send_binary(&self.data_channel, message).await;
    }
}

/// State owned by the supervisor task.
struct Supervisor {
    config: PeerConfig,
    sources: Vec<Arc<dyn MediaSource>>,
    listeners: Listeners,
    credentials: Arc<dyn Credentials>,
    running: Arc<AtomicBool>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

impl Supervisor {
    async fn run(self, mut cancel_rx: watch::Receiver<bool>) {
        let pairing_id = self.credentials.pairing_id();
        let role = self.credentials.role();
        let mut attempt_index: u64 = 0;

        // One pump for the life of the supervisor; attempts clone its
        // sender. Listener dispatch is spawned per event so a slow
        // callback never blocks the session loop.
        let (session_tx, mut session_rx) = mpsc::channel::<SessionEvent>(32);
        let listeners = self.listeners.clone();
        tokio::spawn(async move {
            while let Some(event) = session_rx.recv().await {
                match event {
                    SessionEvent::StateChanged(state) => listeners.emit_state(state),
                    SessionEvent::StringMessage(message) => listeners.emit_string(message),
                    SessionEvent::BinaryMessage(message) => listeners.emit_binary(message),
                    SessionEvent::Error(error) => listeners.emit_error(error),
                }
            }
        });

        while !*cancel_rx.borrow() {
            attempt_index += 1;
            info!(attempt_index, pairing_id = %pairing_id, %role, "starting session attempt");

            let end = self.run_attempt(session_tx.clone(), cancel_rx.clone()).await;
            let cause = end.error();
            if !cause.is_retryable() {
                debug!(attempt_index, "attempt cancelled locally");
                break;
            }
            debug!(attempt_index, ?end, %cause, "attempt ended; retrying");

            // Constant throttle between attempts, cut short by cancel.
            tokio::select! {
                _ = sleep(RETRY_INTERVAL) => {}
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
        debug!(pairing_id = %pairing_id, "supervisor stopped");
    }

    async fn run_attempt(
        &self,
        session_tx: mpsc::Sender<SessionEvent>,
        cancel_rx: watch::Receiver<bool>,
    ) -> SessionEnd {
        let built = PeerTransport::with_channel_slot(
            &self.config.transport,
            &self.sources,
            self.data_channel.clone(),
        )
        .await;
        let (transport, transport_events) = match built {
            Ok(parts) => parts,
            Err(e) => {
                warn!("transport setup failed: {e}");
                let _ = session_tx.send(SessionEvent::Error(e)).await;
                return SessionEnd::PeerFailed;
            }
        };

        let (client, client_events) =
            SignallingClient::new(self.config.signalling_url.clone(), self.credentials.clone());

        Session::new(
            self.credentials.role(),
            client,
            client_events,
            transport,
            transport_events,
            session_tx,
            cancel_rx,
        )
        .run()
        .await
    }
}
