//! Pairing error types.

use thiserror::Error;

/// Errors from pairing operations: key handling, the pairing-server
/// exchange, and persistence.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key import failed: {0}")]
    KeyImport(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("pairing server URL scheme '{0}' is not supported (expected http or https)")]
    SchemeUnsupported(String),

    #[error("invalid pairing server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("pairing server websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("pairing server request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("pairing server closed the connection before completing the exchange")]
    ServerClosed,

    #[error("pairing server sent a malformed response: {0}")]
    MalformedResponse(String),

    #[error("pairing was rejected by the server: status '{0}'")]
    Rejected(String),

    #[error("pairing '{0}' not found")]
    NotFound(String),

    #[error("pairing store I/O error: {0}")]
    StoreIo(#[from] std::io::Error),

    #[error("pairing store contains invalid data: {0}")]
    StoreFormat(String),
}
