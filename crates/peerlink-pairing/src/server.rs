//! Pairing server client.
//!
//! Creating a pairing opens a WebSocket to the server: the first text frame
//! carries our public key and metadata, the server replies with the pairing
//! id, a human-typable shortcode and our signalling token, then the socket
//! stays open until the other device responds to the shortcode. Responding
//! is a single HTTP POST.

use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::PairingError;

/// Client for a pairing server at a fixed base URL.
#[derive(Debug, Clone)]
pub struct PairingServerClient {
    base_url: String,
    http: reqwest::Client,
}

/// First server reply on the pairing socket.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPairing {
    pub pairing_id: String,
    pub shortcode: String,
    pub token: String,
    #[serde(default)]
    pub expiry: u64,
}

/// Second server reply, once the peer has responded to the shortcode.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairingCompletion {
    status: String,
    #[serde(default)]
    initiator_public_key: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Outcome of a completed create-side exchange.
#[derive(Debug)]
pub struct CompletedExchange {
    pub initiator_public_key_jwk: String,
    pub metadata: HashMap<String, String>,
}

/// Response to the shortcode POST.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondedPairing {
    pub pairing_id: String,
    pub responder_public_key: String,
    pub initiator_token: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Serialize)]
struct PairingRequestBody<'a> {
    #[serde(rename = "publicKey")]
    public_key: &'a str,
    metadata: &'a HashMap<String, String>,
}

/// An open pairing exchange, waiting for the peer to respond.
pub struct PendingExchange {
    pub created: CreatedPairing,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PendingExchange {
    /// Blocks until the peer responds to the shortcode, then closes the
    /// socket and returns their public key and metadata.
    pub async fn complete(mut self) -> Result<CompletedExchange, PairingError> {
        let completion = loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    break serde_json::from_str::<PairingCompletion>(text.as_str())
                        .map_err(|e| PairingError::MalformedResponse(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) | None => return Err(PairingError::ServerClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        };
        let _ = self.socket.close(None).await;

        if completion.status != "paired" {
            return Err(PairingError::Rejected(completion.status));
        }

        Ok(CompletedExchange {
            initiator_public_key_jwk: completion.initiator_public_key,
            metadata: completion.metadata,
        })
    }
}

impl PairingServerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Rewrites the configured base URL to its WebSocket equivalent.
    fn websocket_url(&self) -> Result<Url, PairingError> {
        let mut url = Url::parse(&self.base_url)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(PairingError::SchemeUnsupported(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| PairingError::SchemeUnsupported(url.scheme().to_string()))?;
        Ok(url)
    }

    /// Opens a pairing request, returning the shortcode details and a
    /// handle that resolves when the peer responds.
    pub async fn create_pairing_request(
        &self,
        public_key_jwk: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<PendingExchange, PairingError> {
        let url = self.websocket_url()?;
        debug!(url = %url, "opening pairing request");
        let (mut socket, _) = connect_async(url.as_str()).await?;

        let initial = serde_json::to_string(&PairingRequestBody {
            public_key: public_key_jwk,
            metadata,
        })
        .map_err(|e| PairingError::MalformedResponse(e.to_string()))?;
        socket.send(Message::Text(initial.into())).await?;

        let created = loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    break serde_json::from_str::<CreatedPairing>(text.as_str())
                        .map_err(|e| PairingError::MalformedResponse(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) | None => return Err(PairingError::ServerClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        };
        debug!(pairing_id = %created.pairing_id, shortcode = %created.shortcode, "pairing request created");

        Ok(PendingExchange { created, socket })
    }

    /// Responds to a shortcode created by the other device.
    pub async fn respond_to_pairing_request(
        &self,
        shortcode: &str,
        public_key_jwk: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<RespondedPairing, PairingError> {
        // Validate the scheme up front so ws:// and friends fail the same
        // way on both flows.
        let url = Url::parse(&self.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(PairingError::SchemeUnsupported(url.scheme().to_string()));
        }

        let endpoint = format!(
            "{}/respondToPairing/{}",
            self.base_url.trim_end_matches('/'),
            shortcode
        );
        debug!(endpoint = %endpoint, "responding to pairing");
        let response = self
            .http
            .post(&endpoint)
            .json(&PairingRequestBody {
                public_key: public_key_jwk,
                metadata,
            })
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
