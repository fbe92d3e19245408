//! Shared test harness: paired credentials and an in-process relay.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use peerlink_pairing::{EcdsaKeyPair, PairingRecord, Role, SessionCredentials};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Two credentials that verify each other, as a completed pairing would.
pub fn paired_credentials() -> (SessionCredentials, SessionCredentials) {
    let key_a = EcdsaKeyPair::generate();
    let key_b = EcdsaKeyPair::generate();
    let record = |role, local: &EcdsaKeyPair, remote: &EcdsaKeyPair| PairingRecord {
        pairing_id: "test-pairing".to_string(),
        role,
        server_token: "test-token".to_string(),
        local_key_pair: local.clone(),
        remote_public_key: remote.public_key(),
        local_metadata: HashMap::new(),
        remote_metadata: HashMap::new(),
    };
    (
        SessionCredentials::new(record(Role::Initiator, &key_a, &key_b)),
        SessionCredentials::new(record(Role::Responder, &key_b, &key_a)),
    )
}

/// Minimal in-process signalling relay endpoint. Tests drive the protocol
/// explicitly through [`RelayConn`].
pub struct FakeRelay {
    listener: TcpListener,
}

impl FakeRelay {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
        Self { listener }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.listener.local_addr().expect("relay addr"))
    }

    pub async fn accept(&self) -> RelayConn {
        let (stream, _) = self.listener.accept().await.expect("accept");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("websocket handshake");
        RelayConn { ws }
    }
}

/// One accepted client connection on the fake relay.
pub struct RelayConn {
    ws: WebSocketStream<TcpStream>,
}

impl RelayConn {
    /// Next text frame as JSON. Returns `None` once the client is gone.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(text.as_str()).expect("client sent JSON"))
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    pub async fn send_json(&mut self, value: &serde_json::Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("relay send");
    }

    /// Forwards one raw frame string (signature-preserving).
    pub async fn forward_raw(&mut self, frame: String) {
        self.ws
            .send(Message::Text(frame.into()))
            .await
            .expect("relay forward");
    }

    /// Next raw text frame, unparsed. `None` once the client is gone.
    pub async fn recv_raw(&mut self) -> Option<String> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Splits into sink/stream halves so a test can pump frames between
    /// two connections concurrently.
    pub fn split(
        self,
    ) -> (
        futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
        futures::stream::SplitStream<WebSocketStream<TcpStream>>,
    ) {
        self.ws.split()
    }
}

/// Builds a correctly signed server-to-client frame as the peer would: the
/// payload gains the receiver's auth nonce and the sender's signature.
pub fn signed_frame(
    sender: &SessionCredentials,
    msg_type: &str,
    payload: &impl serde::Serialize,
    receiver_nonce: &str,
) -> serde_json::Value {
    use peerlink_session::envelope::Envelope;
    let envelope = Envelope::signed(msg_type, payload, receiver_nonce, sender).expect("sign");
    serde_json::from_str(&envelope.to_wire().expect("wire")).expect("frame json")
}

/// Extracts the nonce from a client's auth frame.
pub fn auth_nonce(frame: &serde_json::Value) -> String {
    assert_eq!(frame["type"], "auth", "first frame must be auth: {frame}");
    let data: serde_json::Value =
        serde_json::from_str(frame["data"].as_str().expect("auth data string")).expect("auth data");
    data["nonce"].as_str().expect("auth nonce").to_string()
}

/// Shorthand: credentials as the trait object the client consumes.
pub fn creds(c: &SessionCredentials) -> Arc<dyn peerlink_session::Credentials> {
    Arc::new(c.clone())
}
