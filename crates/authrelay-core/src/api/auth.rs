//! Login, logout and current-user actions, projected into [`SessionState`].

use std::sync::Arc;

use tracing::{info, warn};

use super::client::ApiClient;
use super::request::RequestDescriptor;
use super::ApiError;
use crate::auth::{Credential, SessionEvent, SessionState};
use crate::config::Endpoints;
use crate::models::{LoginRequest, LoginResponse, LogoutRequest, User};

pub struct AuthService {
    client: ApiClient,
    endpoints: Endpoints,
    session: Arc<SessionState>,
}

impl AuthService {
    /// The session follows the client's events from here on, so an
    /// invalidation raised by any request logs it out.
    /// Must be called from within a Tokio runtime.
    pub fn new(client: ApiClient, endpoints: Endpoints) -> Self {
        let session = Arc::new(SessionState::new());
        session.follow(client.events().cursor());

        Self {
            client,
            endpoints,
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        self.session.begin();
        self.session.clear_error();

        match self.send_login(username, password).await {
            Ok(resp) => {
                match resp.token {
                    Some(token) => self
                        .client
                        .credentials()
                        .set(Credential::new(token).with_refresh(resp.refresh)),
                    // Cookie session; nothing to inject.
                    None => self.client.credentials().clear(),
                }
                info!(username = %resp.user.username, "Login successful");
                self.session.set_user(Some(resp.user.clone()));
                self.settle();
                self.client.events().emit(SessionEvent::LoggedIn {
                    username: resp.user.username.clone(),
                });
                Ok(resp.user)
            }
            Err(e) => {
                warn!(username, error = %e, "Login failed");
                self.session.fail(e.message());
                self.settle();
                Err(e)
            }
        }
    }

    async fn send_login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let request = RequestDescriptor::post(self.endpoints.login.as_str())
            .unauthenticated()
            .json(&body)?;
        self.client
            .request(request)
            .await
            .map_err(ApiError::into_auth_failure)?
            .json()
    }

    /// Events emitted before this point describe an older session.
    fn settle(&self) {
        self.session.establish(self.client.events().position());
    }

    /// End the session. The local credential and projection are cleared even
    /// when the server call fails; that failure is still reported.
    ///
    /// A session is active when a credential is stored or the projection is
    /// authenticated (a cookie login stores no credential).
    pub async fn logout(&self) -> Result<(), ApiError> {
        let credential = self.client.credentials().get();
        if credential.is_none() && !self.session.is_authenticated() {
            self.client.credentials().clear();
            self.session.logged_out();
            self.settle();
            return Ok(());
        }

        self.session.begin();
        let body = LogoutRequest {
            refresh: credential.and_then(|c| c.refresh),
        };
        let result = self
            .client
            .post_empty(self.endpoints.logout.as_str(), &body)
            .await
            .map_err(ApiError::into_auth_failure);

        self.client.credentials().clear();
        self.session.logged_out();
        self.settle();
        self.client.events().emit(SessionEvent::LoggedOut);

        match result {
            Ok(_) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Server-side logout failed; local session cleared");
                self.session.fail(e.message());
                Err(e)
            }
        }
    }

    pub async fn get_user_info(&self) -> Result<User, ApiError> {
        self.session.begin();
        match self.client.get_json::<User>(self.endpoints.info.as_str()).await {
            Ok(user) => {
                self.session.set_user(Some(user.clone()));
                Ok(user)
            }
            Err(e) => {
                self.session.fail(e.message());
                Err(e)
            }
        }
    }

    pub fn clear_error(&self) {
        self.session.clear_error();
    }
}
