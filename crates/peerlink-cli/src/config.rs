use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Signalling relay URL.
    #[serde(default = "default_signalling_url")]
    pub signalling_url: String,
    /// Pairing server base URL (http/https).
    #[serde(default = "default_pairing_url")]
    pub pairing_url: String,
    /// Where completed pairings are persisted.
    #[serde(default = "default_pairings_file")]
    pub pairings_file: PathBuf,
    /// STUN servers; empty uses the built-in defaults.
    #[serde(default)]
    pub stun_servers: Vec<String>,
}

fn default_signalling_url() -> String {
    "wss://signalling.peerlink.dev".to_string()
}

fn default_pairing_url() -> String {
    "https://pairing.peerlink.dev".to_string()
}

fn default_pairings_file() -> PathBuf {
    dirs_home().join(".peerlink").join("pairings.json")
}

fn dirs_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signalling_url: default_signalling_url(),
            pairing_url: default_pairing_url(),
            pairings_file: default_pairings_file(),
            stun_servers: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the config file, or defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading config {}", path.display())),
        }
    }

    pub fn default_path() -> PathBuf {
        dirs_home().join(".peerlink").join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.signalling_url, default_signalling_url());
        assert!(config.stun_servers.is_empty());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"signalling_url":"ws://localhost:9100"}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.signalling_url, "ws://localhost:9100");
        assert_eq!(config.pairing_url, default_pairing_url());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
