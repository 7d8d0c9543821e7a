//! Durable key-value slots the credential store persists through.
//!
//! - `MemorySlot`: process-local, for tests and `--ephemeral` runs
//! - `FileSlot`: one file per key in the cache directory, optionally sealed
//! - `KeyringSlot`: OS keychain via `keyring`

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use keyring::Entry;
use thiserror::Error;

use super::cipher::SealKey;

#[derive(Error, Debug)]
pub enum SlotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Corrupt slot data: {0}")]
    Corrupt(String),
}

/// get / set / remove by key. Implementations must be safe to share.
pub trait CredentialSlot: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, SlotError>;
    fn save(&self, key: &str, value: &str) -> Result<(), SlotError>;
    fn remove(&self, key: &str) -> Result<(), SlotError>;
}

#[derive(Debug, Default)]
pub struct MemorySlot {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialSlot for MemorySlot {
    fn load(&self, key: &str) -> Result<Option<String>, SlotError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), SlotError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SlotError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Stores each key as a file under `dir`.
#[derive(Debug, Clone)]
pub struct FileSlot {
    dir: PathBuf,
    seal: Option<SealKey>,
}

impl FileSlot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seal: None,
        }
    }

    /// Encrypt values at rest with a key derived from `passphrase`.
    pub fn sealed(dir: impl Into<PathBuf>, passphrase: &str) -> Self {
        Self {
            dir: dir.into(),
            seal: Some(SealKey::new(passphrase)),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        let ext = if self.seal.is_some() { "sealed" } else { "json" };
        self.dir.join(format!("{}.{}", key, ext))
    }
}

impl CredentialSlot for FileSlot {
    fn load(&self, key: &str) -> Result<Option<String>, SlotError> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)?;
        let bytes = match self.seal {
            Some(ref seal) => seal.open(&raw)?,
            None => raw,
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| SlotError::Corrupt(e.to_string()))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), SlotError> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = match self.seal {
            Some(ref seal) => seal.seal(value.as_bytes())?,
            None => value.as_bytes().to_vec(),
        };
        std::fs::write(self.path(key), bytes)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SlotError> {
        let path = self.path(key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// OS keychain slot. `service` namespaces the entries.
#[derive(Debug, Clone)]
pub struct KeyringSlot {
    service: String,
}

impl KeyringSlot {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl CredentialSlot for KeyringSlot {
    fn load(&self, key: &str) -> Result<Option<String>, SlotError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), SlotError> {
        let entry = Entry::new(&self.service, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SlotError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
