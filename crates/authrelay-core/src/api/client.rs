//! Authenticated client used by every domain API module.
//!
//! `ApiClient::request` attaches the current credential, sends through the
//! transport, and on an expiry failure defers to the [`RefreshCoordinator`]
//! before replaying the request exactly once.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::coordinator::RefreshCoordinator;
use super::request::{RequestDescriptor, Response};
use super::transport::{HttpTransport, Transport};
use super::ApiError;
use crate::auth::{CredentialStore, EventBus, SessionEvent};
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

/// How many times a request may be replayed after a renewal.
const MAX_REPLAYS: u32 = 1;

/// Authenticated API client.
/// Clone is cheap - all clones share the transport, credential and coordinator.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    events: EventBus,
}

impl ApiClient {
    /// Create a client over `transport` with its own refresh coordinator.
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        refresh_path: impl Into<String>,
        refresh_timeout: Option<Duration>,
    ) -> Self {
        let events = EventBus::new();
        let coordinator = Arc::new(RefreshCoordinator::new(
            transport.clone(),
            credentials.clone(),
            events.clone(),
            refresh_path,
            refresh_timeout,
        ));

        Self {
            transport,
            credentials,
            coordinator,
            events,
        }
    }

    /// Create an HTTP-backed client from configuration.
    pub fn from_config(config: &Config, credentials: Arc<CredentialStore>) -> Result<Self, ApiError> {
        let transport = HttpTransport::new(
            config.base_url.as_str(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::new(
            Arc::new(transport),
            credentials,
            config.endpoints.refresh.as_str(),
            config.refresh_timeout(),
        ))
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Send `descriptor`, renewing the credential and replaying once if it
    /// has expired.
    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<Response, ApiError> {
        let mut current = descriptor;
        let mut token = self.credentials.access_token();

        loop {
            let outgoing = match token {
                Some(ref t) if current.is_authenticated() => current.with_bearer(t),
                _ => current.clone(),
            };

            let err = match self.transport.send(&outgoing).await {
                Err(err) if err.is_expiry() => err,
                other => return other,
            };

            if !current.is_authenticated() {
                return Err(err.into_auth_failure());
            }

            if current.attempt() >= MAX_REPLAYS {
                warn!(
                    path = %current.path,
                    attempt = current.attempt(),
                    "Request rejected again after renewal, invalidating session"
                );
                let message = err.message();
                self.events.emit(SessionEvent::Invalidated {
                    reason: message.clone(),
                });
                return Err(ApiError::Auth {
                    status: 401,
                    message,
                });
            }

            debug!(path = %current.path, "Credential expired, deferring to refresh coordinator");
            let renewed = self.coordinator.refresh(token.as_deref()).await?;
            token = renewed.map(|credential| credential.access);
            current = current.retried();
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(RequestDescriptor::get(path)).await?.json()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(RequestDescriptor::post(path).json(body)?)
            .await?
            .json()
    }

    /// POST where the response body is irrelevant.
    pub async fn post_empty<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, ApiError> {
        self.request(RequestDescriptor::post(path).json(body)?).await
    }
}
