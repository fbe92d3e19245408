//! Stored pairing state.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{EcdsaKeyPair, EcdsaPublicKey};

/// Which side of a session this device takes. The initiator produces the
/// first session description once the relay reports the peer online; the
/// responder answers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed pairing: everything needed to authenticate a session with
/// the paired device. Immutable for the life of a session.
#[derive(Debug, Clone)]
pub struct PairingRecord {
    pub pairing_id: String,
    pub role: Role,
    pub server_token: String,
    pub local_key_pair: EcdsaKeyPair,
    pub remote_public_key: EcdsaPublicKey,
    pub local_metadata: HashMap<String, String>,
    pub remote_metadata: HashMap<String, String>,
}
