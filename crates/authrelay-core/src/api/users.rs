use super::client::ApiClient;
use super::ApiError;
use crate::config::Endpoints;
use crate::models::{NewUser, User};

/// Account management endpoints.
#[derive(Clone)]
pub struct UsersApi {
    client: ApiClient,
    endpoints: Endpoints,
}

impl UsersApi {
    pub fn new(client: ApiClient, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    /// The account the current credential belongs to.
    pub async fn info(&self) -> Result<User, ApiError> {
        self.client.get_json(self.endpoints.info.as_str()).await
    }

    pub async fn list(&self) -> Result<Vec<User>, ApiError> {
        self.client.get_json(self.endpoints.users.as_str()).await
    }

    pub async fn create(&self, user: &NewUser) -> Result<User, ApiError> {
        self.client
            .post_json(self.endpoints.users_create.as_str(), user)
            .await
    }
}
