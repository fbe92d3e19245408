//! ECDSA P-256 key handling and JWK interchange.
//!
//! Keys cross the pairing server as JWK objects (`{kty:"EC", crv:"P-256",
//! x, y}`, private keys add `d`) with base64url-unpadded big-endian
//! coordinates. Leading zero bytes are stripped on export and restored on
//! import, so coordinates may be shorter than 32 bytes on the wire.
//!
//! Signatures are ECDSA over SHA-256 of the message. Signing emits ASN.1
//! DER; verification accepts DER or the exact 64-byte zero-padded `(r,s)`
//! concatenation. Any other width fails verification.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{EncodedPoint, FieldBytes};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::PairingError;

/// Nonce length in bytes (144 bits of entropy).
pub const NONCE_BYTES: usize = 18;

/// Generates a cryptographically-secure random nonce, standard base64.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// JWK wire representation. Unknown members are ignored on import.
#[derive(Debug, Serialize, Deserialize)]
struct Jwk {
    kty: String,
    crv: String,
    x: String,
    y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    d: Option<String>,
}

/// A peer's P-256 public key, used to verify signed signalling messages.
#[derive(Debug, Clone)]
pub struct EcdsaPublicKey {
    key: VerifyingKey,
}

impl EcdsaPublicKey {
    /// Imports a JWK-encoded P-256 public key.
    ///
    /// Rejects non-EC `kty`, non-P-256 `crv` and coordinates that do not
    /// decode to a point on the curve.
    pub fn from_jwk(jwk: &str) -> Result<Self, PairingError> {
        let members: Jwk = serde_json::from_str(jwk)
            .map_err(|e| PairingError::KeyImport(format!("invalid JWK JSON: {e}")))?;
        Self::from_members(&members)
    }

    fn from_members(members: &Jwk) -> Result<Self, PairingError> {
        if members.kty != "EC" {
            return Err(PairingError::KeyImport(format!(
                "JWK key type '{}' is not acceptable",
                members.kty
            )));
        }
        if members.crv != "P-256" {
            return Err(PairingError::KeyImport(format!(
                "JWK curve '{}' is not acceptable",
                members.crv
            )));
        }

        let x = decode_coordinate(&members.x)?;
        let y = decode_coordinate(&members.y)?;
        let point = EncodedPoint::from_affine_coordinates(&x, &y, false);
        let key = VerifyingKey::from_encoded_point(&point)
            .map_err(|e| PairingError::KeyImport(format!("point not on curve: {e}")))?;

        Ok(Self { key })
    }

    /// Verifies a signature over the exact message bytes.
    ///
    /// The signature may be ASN.1 DER or the fixed-width 64-byte `(r,s)`
    /// form. Unpadded fixed-width signatures are neither, and fail.
    pub fn verify(&self, signature: &[u8], message: &[u8]) -> bool {
        let parsed = Signature::from_der(signature).or_else(|_| Signature::from_slice(signature));
        match parsed {
            Ok(sig) => self.key.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }

    /// Exports this key as a JWK string.
    pub fn to_jwk(&self) -> String {
        let point = self.key.to_encoded_point(false);
        let members = Jwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: encode_coordinate(point.x().map(|x| x.as_slice()).unwrap_or(&[])),
            y: encode_coordinate(point.y().map(|y| y.as_slice()).unwrap_or(&[])),
            d: None,
        };
        // A struct of strings always serializes.
        serde_json::to_string(&members).expect("JWK serialization")
    }
}

/// A local P-256 key pair, used to sign outbound signalling messages.
#[derive(Debug, Clone)]
pub struct EcdsaKeyPair {
    key: SigningKey,
}

impl EcdsaKeyPair {
    /// Generates a fresh key pair from the system RNG.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Imports a JWK-encoded P-256 private key (a public JWK plus `d`).
    pub fn from_jwk(jwk: &str) -> Result<Self, PairingError> {
        let members: Jwk = serde_json::from_str(jwk)
            .map_err(|e| PairingError::KeyImport(format!("invalid JWK JSON: {e}")))?;

        // Validate the public half first so kty/crv mismatches are caught
        // before scalar decoding.
        let public = EcdsaPublicKey::from_members(&members)?;

        let d = members
            .d
            .as_deref()
            .ok_or_else(|| PairingError::KeyImport("private JWK is missing 'd'".to_string()))?;
        let scalar = decode_coordinate(d)?;
        let key = SigningKey::from_bytes(&scalar)
            .map_err(|e| PairingError::KeyImport(format!("invalid private scalar: {e}")))?;

        if key.verifying_key() != &public.key {
            return Err(PairingError::KeyImport(
                "private scalar does not match the public coordinates".to_string(),
            ));
        }

        Ok(Self { key })
    }

    /// Signs the exact message bytes, returning an ASN.1 DER signature.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, PairingError> {
        let signature: Signature = self.key.sign(message);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// The public half of this key pair.
    pub fn public_key(&self) -> EcdsaPublicKey {
        EcdsaPublicKey {
            key: VerifyingKey::from(&self.key),
        }
    }

    /// Exports the private key as a JWK string (public members plus `d`).
    pub fn to_jwk(&self) -> String {
        let point = self.key.verifying_key().to_encoded_point(false);
        let members = Jwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: encode_coordinate(point.x().map(|x| x.as_slice()).unwrap_or(&[])),
            y: encode_coordinate(point.y().map(|y| y.as_slice()).unwrap_or(&[])),
            d: Some(encode_coordinate(self.key.to_bytes().as_slice())),
        };
        serde_json::to_string(&members).expect("JWK serialization")
    }
}

/// Decodes a base64url-unpadded big-endian coordinate, restoring stripped
/// leading zeros to the full 32-byte field width.
fn decode_coordinate(encoded: &str) -> Result<FieldBytes, PairingError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| PairingError::KeyImport(format!("invalid coordinate base64: {e}")))?;
    if bytes.len() > 32 {
        return Err(PairingError::KeyImport(format!(
            "coordinate is {} bytes, exceeds field width",
            bytes.len()
        )));
    }
    let mut out = FieldBytes::default();
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Encodes a big-endian coordinate with leading zeros stripped.
fn encode_coordinate(bytes: &[u8]) -> String {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    URL_SAFE_NO_PAD.encode(&bytes[start..])
}
