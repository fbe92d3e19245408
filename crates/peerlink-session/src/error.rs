//! Signalling and session error taxonomy.

use thiserror::Error;

/// Errors that end a signalling attempt. Every variant except
/// [`SignalError::Cancelled`] causes the supervisor to retry.
#[derive(Debug, Clone, Error)]
pub enum SignalError {
    /// The relay could not be reached.
    #[error("failed to dial signalling server: {0}")]
    DialFailed(String),

    /// The socket failed while sending the auth message.
    #[error("failed to send auth message: {0}")]
    AuthSendFailed(String),

    /// The peer or relay violated the protocol: empty peer-connect nonce,
    /// missing or mismatched body nonce, bad signature, malformed JSON.
    #[error("signalling protocol violation: {0}")]
    ProtocolViolation(String),

    /// The socket dropped mid-attempt.
    #[error("signalling connection lost: {0}")]
    ConnectionLost(String),

    /// The peer transport reached Failed or Closed.
    #[error("peer transport failure: {0}")]
    TransportFailure(String),

    /// Signing or key handling failed.
    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    /// The attempt was cancelled locally.
    #[error("cancelled")]
    Cancelled,
}

impl SignalError {
    /// Whether the supervisor should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SignalError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancellation_is_terminal() {
        assert!(SignalError::DialFailed("refused".into()).is_retryable());
        assert!(SignalError::ProtocolViolation("bad nonce".into()).is_retryable());
        assert!(SignalError::TransportFailure("failed".into()).is_retryable());
        assert!(!SignalError::Cancelled.is_retryable());
    }
}
