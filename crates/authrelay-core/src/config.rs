//! Application configuration management.
//!
//! Holds the backend base URL, endpoint paths, timeouts and the credential
//! backend choice. Stored at `~/.config/authrelay/config.json`; missing
//! fields fall back to defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialSlot, FileSlot, KeyringSlot, MemorySlot};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "authrelay";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Renewal timeout in seconds. Waiters fail with `RefreshTimeout` after this.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

/// Backend paths, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
    pub info: String,
    pub users: String,
    pub users_create: String,
    pub roles: String,
    pub roles_create: String,
    pub roles_user: String,
    pub roles_assign: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login/".to_string(),
            refresh: "/auth/refresh/".to_string(),
            logout: "/auth/logout/".to_string(),
            info: "/auth/info/".to_string(),
            users: "/auth/list/".to_string(),
            users_create: "/auth/create/".to_string(),
            roles: "/auth/roles/".to_string(),
            roles_create: "/auth/roles/create/".to_string(),
            roles_user: "/auth/roles/user/".to_string(),
            roles_assign: "/auth/roles/assign/".to_string(),
        }
    }
}

/// Where the credential is persisted between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub endpoints: Endpoints,
    pub request_timeout_secs: u64,
    /// `None` disables the renewal timeout.
    pub refresh_timeout_secs: Option<u64>,
    pub credential_backend: CredentialBackend,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            endpoints: Endpoints::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: Some(DEFAULT_REFRESH_TIMEOUT_SECS),
            credential_backend: CredentialBackend::default(),
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `AUTHRELAY_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("AUTHRELAY_BASE_URL") {
            self.base_url = url;
        }
        if let Some(secs) = lookup("AUTHRELAY_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(secs) = lookup("AUTHRELAY_REFRESH_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            self.refresh_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(backend) = lookup("AUTHRELAY_CREDENTIAL_BACKEND") {
            match backend.to_ascii_lowercase().as_str() {
                "file" => self.credential_backend = CredentialBackend::File,
                "keyring" => self.credential_backend = CredentialBackend::Keyring,
                "memory" => self.credential_backend = CredentialBackend::Memory,
                _ => tracing::warn!(%backend, "Ignoring unknown credential backend"),
            }
        }
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        self.refresh_timeout_secs.map(Duration::from_secs)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Build the durable slot for the configured backend.
    /// A passphrase seals the file backend; other backends ignore it.
    pub fn credential_slot(&self, passphrase: Option<&str>) -> Result<Arc<dyn CredentialSlot>> {
        Ok(match self.credential_backend {
            CredentialBackend::File => {
                let dir = self.cache_dir()?;
                match passphrase {
                    Some(p) if !p.is_empty() => Arc::new(FileSlot::sealed(dir, p)),
                    _ => Arc::new(FileSlot::new(dir)),
                }
            }
            CredentialBackend::Keyring => Arc::new(KeyringSlot::new(APP_NAME)),
            CredentialBackend::Memory => Arc::new(MemorySlot::new()),
        })
    }
}
