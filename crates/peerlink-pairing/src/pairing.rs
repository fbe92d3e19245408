//! High-level pairing flows.
//!
//! The device that *creates* a pairing request is stored with the
//! `responder` role, and the device that answers the shortcode with
//! `initiator`: roles name who opens the eventual session, not who started
//! the pairing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::credentials::SessionCredentials;
use crate::crypto::{EcdsaKeyPair, EcdsaPublicKey};
use crate::error::PairingError;
use crate::record::{PairingRecord, Role};
use crate::server::{PairingServerClient, PendingExchange};
use crate::storage::PairingStore;

/// Pairing API over a server client and a store.
pub struct Pairing {
    store: Arc<dyn PairingStore>,
    server: PairingServerClient,
}

/// Outcome of a completed pairing on either side.
#[derive(Debug)]
pub struct PairingResult {
    pub pairing_id: String,
    pub remote_metadata: HashMap<String, String>,
}

/// A created pairing request waiting for the peer. Exposes the shortcode
/// to show the user and completes once the peer responds.
pub struct PendingPairing {
    pub shortcode: String,
    pub pairing_id: String,
    exchange: PendingExchange,
    key_pair: EcdsaKeyPair,
    metadata: HashMap<String, String>,
    store: Arc<dyn PairingStore>,
}

impl PendingPairing {
    /// Waits for the peer to respond, then persists the completed pairing.
    pub async fn complete(self) -> Result<PairingResult, PairingError> {
        let pairing_id = self.exchange.created.pairing_id.clone();
        let token = self.exchange.created.token.clone();
        let completed = self.exchange.complete().await?;

        let remote_public_key = EcdsaPublicKey::from_jwk(&completed.initiator_public_key_jwk)?;

        self.store.save(PairingRecord {
            pairing_id: pairing_id.clone(),
            role: Role::Responder,
            server_token: token,
            local_key_pair: self.key_pair,
            remote_public_key,
            local_metadata: self.metadata,
            remote_metadata: completed.metadata.clone(),
        })?;
        info!(pairing_id = %pairing_id, role = %Role::Responder, "pairing completed");

        Ok(PairingResult {
            pairing_id,
            remote_metadata: completed.metadata,
        })
    }
}

impl Pairing {
    pub fn new(server_base_url: impl Into<String>, store: Arc<dyn PairingStore>) -> Self {
        Self {
            store,
            server: PairingServerClient::new(server_base_url),
        }
    }

    /// Creates a pairing request. The returned handle carries the shortcode
    /// for the user and completes when the peer responds to it.
    pub async fn initiate_pairing(
        &self,
        metadata: HashMap<String, String>,
    ) -> Result<PendingPairing, PairingError> {
        let key_pair = EcdsaKeyPair::generate();
        let public_jwk = key_pair.public_key().to_jwk();

        let exchange = self
            .server
            .create_pairing_request(&public_jwk, &metadata)
            .await?;

        Ok(PendingPairing {
            shortcode: exchange.created.shortcode.clone(),
            pairing_id: exchange.created.pairing_id.clone(),
            exchange,
            key_pair,
            metadata,
            store: self.store.clone(),
        })
    }

    /// Responds to a shortcode from the other device and persists the
    /// completed pairing.
    pub async fn respond_to_pairing(
        &self,
        shortcode: &str,
        metadata: HashMap<String, String>,
    ) -> Result<PairingResult, PairingError> {
        let key_pair = EcdsaKeyPair::generate();
        let public_jwk = key_pair.public_key().to_jwk();

        let details = self
            .server
            .respond_to_pairing_request(shortcode, &public_jwk, &metadata)
            .await?;

        let remote_public_key = EcdsaPublicKey::from_jwk(&details.responder_public_key)?;

        self.store.save(PairingRecord {
            pairing_id: details.pairing_id.clone(),
            role: Role::Initiator,
            server_token: details.initiator_token,
            local_key_pair: key_pair,
            remote_public_key,
            local_metadata: metadata,
            remote_metadata: details.metadata.clone(),
        })?;
        info!(pairing_id = %details.pairing_id, role = %Role::Initiator, "pairing completed");

        Ok(PairingResult {
            pairing_id: details.pairing_id,
            remote_metadata: details.metadata,
        })
    }

    /// Session credentials for a stored pairing. Store errors propagate.
    pub fn credentials(&self, pairing_id: &str) -> Result<SessionCredentials, PairingError> {
        Ok(SessionCredentials::new(self.store.get(pairing_id)?))
    }

    pub fn all_pairing_ids(&self) -> Result<Vec<String>, PairingError> {
        self.store.all_ids()
    }

    pub fn delete_pairing(&self, pairing_id: &str) -> Result<(), PairingError> {
        self.store.delete(pairing_id)
    }

    pub fn clear_pairings(&self) -> Result<(), PairingError> {
        self.store.clear()
    }
}
