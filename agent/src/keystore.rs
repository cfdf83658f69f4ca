//! Static key material for the reserved encrypted data path
//!
//! The CLI accepts a YAML key file and direct `-key`/`-ttl` overrides. The
//! store is parsed and validated at startup and carried on the supervisor;
//! the data plane never consults it while the encrypted message type
//! remains reserved.
//!
//! Key file format:
//!
//! ```yaml
//! keys:
//!   - key: "0123456789abcdef"
//!     ttl: 3600
//! ```

use std::fmt;
use std::io;

use serde::Deserialize;

/// One key with its validity window in seconds (0 = no expiry)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CryptoKey {
    pub key: String,
    #[serde(default)]
    pub ttl: u64,
}

/// Ordered key material; the first entry is the active key
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyStore {
    #[serde(default)]
    pub keys: Vec<CryptoKey>,
}

/// Key file failures; fatal at startup
#[derive(Debug)]
pub enum KeyStoreError {
    Io(io::Error),
    Parse(String),
}

impl fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStoreError::Io(e) => write!(f, "failed to read key file: {}", e),
            KeyStoreError::Parse(e) => write!(f, "failed to parse key file: {}", e),
        }
    }
}

impl std::error::Error for KeyStoreError {}

impl KeyStore {
    /// Load a YAML key file
    pub fn load(path: &str) -> Result<KeyStore, KeyStoreError> {
        let contents = std::fs::read_to_string(path).map_err(KeyStoreError::Io)?;
        let store: KeyStore =
            serde_yaml::from_str(&contents).map_err(|e| KeyStoreError::Parse(e.to_string()))?;
        log::info!("loaded {} keys from {}", store.keys.len(), path);
        Ok(store)
    }

    /// Push a CLI-supplied key in front of whatever the file provided
    pub fn push_override(&mut self, key: String, ttl: u64) {
        self.keys.insert(0, CryptoKey { key, ttl });
    }

    /// The key the encrypted path would use
    pub fn active(&self) -> Option<&CryptoKey> {
        self.keys.first()
    }
}
