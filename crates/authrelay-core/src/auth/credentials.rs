use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::slots::{CredentialSlot, MemorySlot};
use crate::utils::mask_secret;

/// Slot key the current credential is persisted under
const CREDENTIAL_KEY: &str = "credential";

/// Proof of an authenticated session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token attached to every authenticated request
    pub access: String,
    /// Renewal token, when the backend hands one out instead of a cookie
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access", &mask_secret(&self.access))
            .field("refresh", &self.refresh.as_deref().map(mask_secret))
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl Credential {
    pub fn new(access: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: None,
            issued_at: Utc::now(),
        }
    }

    pub fn with_refresh(mut self, refresh: Option<String>) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.issued_at
    }
}

/// Holds the current credential in memory and mirrors it to a durable slot.
///
/// The in-memory value is authoritative for the process; slot failures are
/// logged and never fail the caller.
pub struct CredentialStore {
    current: RwLock<Option<Credential>>,
    slot: Arc<dyn CredentialSlot>,
}

impl CredentialStore {
    /// Empty store backed by `slot`. Nothing is read from the slot.
    pub fn new(slot: Arc<dyn CredentialSlot>) -> Self {
        Self {
            current: RwLock::new(None),
            slot,
        }
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySlot::new()))
    }

    /// Store seeded from whatever `slot` persisted last time.
    pub fn load(slot: Arc<dyn CredentialSlot>) -> Self {
        let restored = match slot.load(CREDENTIAL_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Credential>(&raw) {
                Ok(credential) => {
                    debug!(age_secs = credential.age().num_seconds(), "Restored persisted credential");
                    Some(credential)
                }
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable persisted credential");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted credential");
                None
            }
        };

        Self {
            current: RwLock::new(restored),
            slot,
        }
    }

    pub fn get(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.access.clone())
    }

    pub fn is_present(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn set(&self, credential: Credential) {
        let serialized = serde_json::to_string(&credential);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);

        match serialized {
            Ok(raw) => {
                if let Err(e) = self.slot.save(CREDENTIAL_KEY, &raw) {
                    warn!(error = %e, "Failed to persist credential");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize credential"),
        }
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        if let Err(e) = self.slot.remove(CREDENTIAL_KEY) {
            warn!(error = %e, "Failed to remove persisted credential");
        }
    }
}
