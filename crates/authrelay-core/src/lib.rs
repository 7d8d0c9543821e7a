//! authrelay core - an authenticated API client that renews expired
//! credentials once for all concurrent callers and replays their requests.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use authrelay_core::{ApiClient, AuthService, Config, CredentialStore};
//!
//! let config = Config::load()?;
//! let store = Arc::new(CredentialStore::load(config.credential_slot(None)?));
//! let client = ApiClient::from_config(&config, store)?;
//! let auth = AuthService::new(client, config.endpoints.clone());
//! auth.login("ana", "secret").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{
    ApiClient, ApiError, AuthService, HttpTransport, RefreshCoordinator, RequestDescriptor,
    Response, RolesApi, Transport, UsersApi,
};
pub use auth::{Credential, CredentialSlot, CredentialStore, EventBus, Session, SessionEvent, SessionState};
pub use config::{Config, CredentialBackend, Endpoints};
