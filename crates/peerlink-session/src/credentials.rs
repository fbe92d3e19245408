//! Credential capability consumed by the signalling client.

use peerlink_pairing::{Role, SessionCredentials};

use crate::error::SignalError;

/// What a signalling attempt needs from a pairing: the relay token, the
/// role, fresh nonces, and sign/verify against the paired device.
///
/// Implemented by [`peerlink_pairing::SessionCredentials`] in production;
/// tests substitute their own.
pub trait Credentials: Send + Sync + 'static {
    /// Opaque bearer token sent in the auth message.
    fn generate_token(&self) -> String;

    fn role(&self) -> Role;

    /// Pairing identifier; carried inside the token, logged locally.
    fn pairing_id(&self) -> String;

    /// Fresh random nonce for one attempt.
    fn generate_nonce(&self) -> String;

    /// Signs the exact message bytes; returns a base64 signature.
    fn sign(&self, message: &[u8]) -> Result<String, SignalError>;

    /// Verifies a base64 signature from the peer over the exact bytes.
    fn verify(&self, signature_b64: &str, message: &[u8]) -> bool;
}

impl Credentials for SessionCredentials {
    fn generate_token(&self) -> String {
        SessionCredentials::generate_token(self)
    }

    fn role(&self) -> Role {
        SessionCredentials::role(self)
    }

    fn pairing_id(&self) -> String {
        SessionCredentials::pairing_id(self)
    }

    fn generate_nonce(&self) -> String {
        SessionCredentials::generate_nonce(self)
    }

    fn sign(&self, message: &[u8]) -> Result<String, SignalError> {
        SessionCredentials::sign(self, message)
            .map_err(|e| SignalError::CryptoFailure(e.to_string()))
    }

    fn verify(&self, signature_b64: &str, message: &[u8]) -> bool {
        SessionCredentials::verify(self, signature_b64, message)
    }
}
