//! Session credentials backed by a stored pairing.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::crypto::generate_nonce;
use crate::error::PairingError;
use crate::record::{PairingRecord, Role};

/// Everything a signalling session needs from a pairing: the relay token,
/// the role, fresh nonces, and sign/verify against the paired device.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    record: PairingRecord,
}

impl SessionCredentials {
    pub fn new(record: PairingRecord) -> Self {
        Self { record }
    }

    /// The opaque bearer token the relay expects in the auth message.
    pub fn generate_token(&self) -> String {
        self.record.server_token.clone()
    }

    pub fn role(&self) -> Role {
        self.record.role
    }

    pub fn pairing_id(&self) -> String {
        self.record.pairing_id.clone()
    }

    /// A fresh nonce for one signalling attempt.
    pub fn generate_nonce(&self) -> String {
        generate_nonce()
    }

    /// Signs the exact message bytes, returning a base64 signature.
    pub fn sign(&self, message: &[u8]) -> Result<String, PairingError> {
        let signature = self.record.local_key_pair.sign(message)?;
        Ok(STANDARD.encode(signature))
    }

    /// Verifies a base64 signature from the paired device over the exact
    /// message bytes.
    pub fn verify(&self, signature_b64: &str, message: &[u8]) -> bool {
        match STANDARD.decode(signature_b64) {
            Ok(signature) => self.record.remote_public_key.verify(&signature, message),
            Err(_) => false,
        }
    }
}
