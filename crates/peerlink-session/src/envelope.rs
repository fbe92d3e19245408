//! Signed envelope codec for the signalling wire format.
//!
//! Envelopes are JSON text frames `{type, signature?, data?, nonce?}`.
//! `data` is itself a JSON string so the signature can cover its exact
//! bytes: outbound payloads are serialized once, with the peer's nonce as
//! a required field, and those bytes are signed. Inbound verification runs
//! over the received string verbatim, never a re-serialization.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::credentials::Credentials;
use crate::error::SignalError;

pub const TYPE_AUTH: &str = "auth";
pub const TYPE_PEER_CONNECT: &str = "peerConnect";
pub const TYPE_PEER_DISCONNECT: &str = "peerDisconnect";
pub const TYPE_OFFER: &str = "offer";
pub const TYPE_ANSWER: &str = "answer";
pub const TYPE_ICE_CANDIDATE: &str = "iceCandidate";

/// One signalling frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Only present on peerConnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Body of the unsigned auth message.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthData {
    pub nonce: String,
    pub token: String,
}

/// Candidate payload matching RTCIceCandidateInit on the wire. Kept as our
/// own struct so field casing stays browser-compatible (`sdpMLineIndex`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Wraps a payload with the required nonce echo so the wire bytes are
/// produced in a single serialization.
#[derive(Serialize)]
struct SignedBody<'a, T: Serialize> {
    #[serde(flatten)]
    payload: &'a T,
    nonce: &'a str,
}

/// Pulls just the nonce out of a signed body for verification.
#[derive(Deserialize)]
struct NonceProbe {
    nonce: Option<String>,
}

impl Envelope {
    /// Builds the unsigned auth envelope carrying our nonce and token.
    pub fn auth(local_nonce: &str, token: &str) -> Result<Self, SignalError> {
        let data = serde_json::to_string(&AuthData {
            nonce: local_nonce.to_string(),
            token: token.to_string(),
        })
        .map_err(|e| SignalError::ProtocolViolation(format!("auth encode: {e}")))?;
        Ok(Self {
            msg_type: TYPE_AUTH.to_string(),
            signature: None,
            data: Some(data),
            nonce: None,
        })
    }

    /// Builds a signed envelope: the payload gains a `nonce` field equal to
    /// the peer's nonce, is serialized once, and the signature covers those
    /// exact bytes.
    pub fn signed<T: Serialize>(
        msg_type: &str,
        payload: &T,
        remote_nonce: &str,
        credentials: &dyn Credentials,
    ) -> Result<Self, SignalError> {
        let data = serde_json::to_string(&SignedBody {
            payload,
            nonce: remote_nonce,
        })
        .map_err(|e| SignalError::ProtocolViolation(format!("payload encode: {e}")))?;
        let signature = credentials.sign(data.as_bytes())?;
        Ok(Self {
            msg_type: msg_type.to_string(),
            signature: Some(signature),
            data: Some(data),
            nonce: None,
        })
    }

    /// Parses one wire frame.
    pub fn parse(text: &str) -> Result<Self, SignalError> {
        serde_json::from_str(text)
            .map_err(|e| SignalError::ProtocolViolation(format!("malformed envelope: {e}")))
    }

    /// Serializes this envelope to a wire frame.
    pub fn to_wire(&self) -> Result<String, SignalError> {
        serde_json::to_string(self)
            .map_err(|e| SignalError::ProtocolViolation(format!("envelope encode: {e}")))
    }

    /// Verifies a signed envelope against our nonce and the peer's key,
    /// returning the raw body for typed decoding. Any failure is fatal to
    /// the attempt.
    pub fn verify_signed(
        &self,
        local_nonce: &str,
        credentials: &dyn Credentials,
    ) -> Result<&str, SignalError> {
        let data = self.data.as_deref().ok_or_else(|| {
            SignalError::ProtocolViolation(format!("{} message has no body", self.msg_type))
        })?;

        let probe: NonceProbe = serde_json::from_str(data)
            .map_err(|e| SignalError::ProtocolViolation(format!("malformed body: {e}")))?;
        let received = probe.nonce.ok_or_else(|| {
            SignalError::ProtocolViolation(format!("{} body is missing a nonce", self.msg_type))
        })?;

        if !nonce_matches(local_nonce, &received) {
            return Err(SignalError::ProtocolViolation(format!(
                "nonce '{received}' does not match the nonce sent in auth"
            )));
        }

        let signature = self.signature.as_deref().ok_or_else(|| {
            SignalError::ProtocolViolation(format!("{} message is unsigned", self.msg_type))
        })?;
        if !credentials.verify(signature, data.as_bytes()) {
            return Err(SignalError::ProtocolViolation(format!(
                "invalid signature on {} message",
                self.msg_type
            )));
        }

        Ok(data)
    }
}

/// Decodes a verified body into its typed payload.
pub fn decode_payload<T: DeserializeOwned>(data: &str) -> Result<T, SignalError> {
    serde_json::from_str(data)
        .map_err(|e| SignalError::ProtocolViolation(format!("malformed payload: {e}")))
}

/// Constant-time nonce equality. An empty expectation always rejects: no
/// signed message is acceptable before auth sent our nonce.
fn nonce_matches(expected: &str, received: &str) -> bool {
    !expected.is_empty()
        && expected.len() == received.len()
        && bool::from(expected.as_bytes().ct_eq(received.as_bytes()))
}
