//! Pairing persistence.
//!
//! The file store keeps a JSON map keyed by pairing id, each entry holding
//! the role, server token and JWK-encoded keys. An absent file is treated
//! as an empty map; a file that exists but does not parse is an error the
//! caller sees.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::crypto::{EcdsaKeyPair, EcdsaPublicKey};
use crate::error::PairingError;
use crate::record::{PairingRecord, Role};

/// Storage backend for completed pairings.
pub trait PairingStore: Send + Sync {
    fn save(&self, record: PairingRecord) -> Result<(), PairingError>;
    fn get(&self, pairing_id: &str) -> Result<PairingRecord, PairingError>;
    fn all_ids(&self) -> Result<Vec<String>, PairingError>;
    fn delete(&self, pairing_id: &str) -> Result<(), PairingError>;
    fn clear(&self) -> Result<(), PairingError>;
}

/// Volatile store, mainly for tests and short-lived tools.
#[derive(Default)]
pub struct InMemoryPairingStore {
    records: Mutex<HashMap<String, PairingRecord>>,
}

impl InMemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PairingStore for InMemoryPairingStore {
    fn save(&self, record: PairingRecord) -> Result<(), PairingError> {
        self.records
            .lock()
            .unwrap()
            .insert(record.pairing_id.clone(), record);
        Ok(())
    }

    fn get(&self, pairing_id: &str) -> Result<PairingRecord, PairingError> {
        self.records
            .lock()
            .unwrap()
            .get(pairing_id)
            .cloned()
            .ok_or_else(|| PairingError::NotFound(pairing_id.to_string()))
    }

    fn all_ids(&self) -> Result<Vec<String>, PairingError> {
        Ok(self.records.lock().unwrap().keys().cloned().collect())
    }

    fn delete(&self, pairing_id: &str) -> Result<(), PairingError> {
        self.records.lock().unwrap().remove(pairing_id);
        Ok(())
    }

    fn clear(&self) -> Result<(), PairingError> {
        self.records.lock().unwrap().clear();
        Ok(())
    }
}

/// On-disk serialized form of one pairing. Field names are part of the
/// persisted format shared with the other platform implementations.
#[derive(Debug, Serialize, Deserialize)]
struct StoredPairing {
    #[serde(rename = "Role")]
    role: Role,
    #[serde(rename = "ServerToken")]
    server_token: String,
    #[serde(rename = "RemotePublicKeyJwk")]
    remote_public_key_jwk: String,
    #[serde(rename = "LocalPublicKeyJwk")]
    local_public_key_jwk: String,
    #[serde(rename = "LocalPrivateKeyJwk")]
    local_private_key_jwk: String,
    #[serde(rename = "LocalMetadata", default)]
    local_metadata: HashMap<String, String>,
    #[serde(rename = "RemoteMetadata", default)]
    remote_metadata: HashMap<String, String>,
}

/// File-backed store: one JSON object mapping pairing id to entry.
pub struct FilePairingStore {
    path: PathBuf,
    // File accesses are read-modify-write; serialize them.
    lock: Mutex<()>,
}

impl FilePairingStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> Result<HashMap<String, StoredPairing>, PairingError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            PairingError::StoreFormat(format!("{}: {e}", self.path.display()))
        })
    }

    fn write_map(&self, map: &HashMap<String, StoredPairing>) -> Result<(), PairingError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec(map)
            .map_err(|e| PairingError::StoreFormat(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn decode(pairing_id: &str, stored: &StoredPairing) -> Result<PairingRecord, PairingError> {
        Ok(PairingRecord {
            pairing_id: pairing_id.to_string(),
            role: stored.role,
            server_token: stored.server_token.clone(),
            remote_public_key: EcdsaPublicKey::from_jwk(&stored.remote_public_key_jwk)?,
            local_key_pair: EcdsaKeyPair::from_jwk(&stored.local_private_key_jwk)?,
            local_metadata: stored.local_metadata.clone(),
            remote_metadata: stored.remote_metadata.clone(),
        })
    }

    fn encode(record: &PairingRecord) -> StoredPairing {
        StoredPairing {
            role: record.role,
            server_token: record.server_token.clone(),
            remote_public_key_jwk: record.remote_public_key.to_jwk(),
            local_public_key_jwk: record.local_key_pair.public_key().to_jwk(),
            local_private_key_jwk: record.local_key_pair.to_jwk(),
            local_metadata: record.local_metadata.clone(),
            remote_metadata: record.remote_metadata.clone(),
        }
    }
}

impl PairingStore for FilePairingStore {
    fn save(&self, record: PairingRecord) -> Result<(), PairingError> {
        let _guard = self.lock.lock().unwrap();
        let mut map = self.read_map()?;
        map.insert(record.pairing_id.clone(), Self::encode(&record));
        self.write_map(&map)
    }

    fn get(&self, pairing_id: &str) -> Result<PairingRecord, PairingError> {
        let _guard = self.lock.lock().unwrap();
        let map = self.read_map()?;
        let stored = map
            .get(pairing_id)
            .ok_or_else(|| PairingError::NotFound(pairing_id.to_string()))?;
        Self::decode(pairing_id, stored)
    }

    fn all_ids(&self) -> Result<Vec<String>, PairingError> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read_map()?.into_keys().collect())
    }

    fn delete(&self, pairing_id: &str) -> Result<(), PairingError> {
        let _guard = self.lock.lock().unwrap();
        let mut map = self.read_map()?;
        map.remove(pairing_id);
        self.write_map(&map)
    }

    fn clear(&self) -> Result<(), PairingError> {
        let _guard = self.lock.lock().unwrap();
        self.write_map(&HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EcdsaKeyPair;

    fn sample_record(id: &str, role: Role) -> PairingRecord {
        let local = EcdsaKeyPair::generate();
        let remote = EcdsaKeyPair::generate();
        PairingRecord {
            pairing_id: id.to_string(),
            role,
            server_token: format!("token-{id}"),
            local_key_pair: local,
            remote_public_key: remote.public_key(),
            local_metadata: HashMap::from([("name".to_string(), "laptop".to_string())]),
            remote_metadata: HashMap::from([("name".to_string(), "camera".to_string())]),
        }
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePairingStore::new(dir.path().join("pairings.json"));

        store.save(sample_record("abc", Role::Initiator)).unwrap();
        store.save(sample_record("def", Role::Responder)).unwrap();

        let mut ids = store.all_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["abc", "def"]);

        let record = store.get("abc").unwrap();
        assert_eq!(record.role, Role::Initiator);
        assert_eq!(record.server_token, "token-abc");
        assert_eq!(record.local_metadata.get("name").unwrap(), "laptop");

        // The reloaded key pair must still interoperate with the saved
        // remote public key.
        let message = b"storage roundtrip";
        let signature = record.local_key_pair.sign(message).unwrap();
        assert!(record.local_key_pair.public_key().verify(&signature, message));
    }

    #[test]
    fn absent_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePairingStore::new(dir.path().join("missing.json"));
        assert!(store.all_ids().unwrap().is_empty());
        assert!(matches!(
            store.get("nope"),
            Err(PairingError::NotFound(_))
        ));
    }

    #[test]
    fn corrupt_file_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairings.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FilePairingStore::new(&path);
        assert!(matches!(
            store.get("abc"),
            Err(PairingError::StoreFormat(_))
        ));
        assert!(matches!(
            store.all_ids(),
            Err(PairingError::StoreFormat(_))
        ));
    }

    #[test]
    fn delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePairingStore::new(dir.path().join("pairings.json"));
        store.save(sample_record("abc", Role::Initiator)).unwrap();
        store.save(sample_record("def", Role::Responder)).unwrap();

        store.delete("abc").unwrap();
        assert_eq!(store.all_ids().unwrap(), vec!["def"]);

        store.clear().unwrap();
        assert!(store.all_ids().unwrap().is_empty());
    }

    #[test]
    fn in_memory_store_roundtrip() {
        let store = InMemoryPairingStore::new();
        store.save(sample_record("abc", Role::Responder)).unwrap();
        assert_eq!(store.get("abc").unwrap().role, Role::Responder);
        store.delete("abc").unwrap();
        assert!(store.get("abc").is_err());
    }
}
