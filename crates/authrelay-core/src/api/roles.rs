use futures::future::try_join_all;

use super::client::ApiClient;
use super::ApiError;
use crate::config::Endpoints;
use crate::models::{AssignmentReceipt, NewRole, Role, RoleAssignment, UserRole};

/// Role management endpoints.
#[derive(Clone)]
pub struct RolesApi {
    client: ApiClient,
    endpoints: Endpoints,
}

impl RolesApi {
    pub fn new(client: ApiClient, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    /// All active roles.
    pub async fn list(&self) -> Result<Vec<Role>, ApiError> {
        self.client.get_json(self.endpoints.roles.as_str()).await
    }

    pub async fn create(&self, role: &NewRole) -> Result<Role, ApiError> {
        self.client
            .post_json(self.endpoints.roles_create.as_str(), role)
            .await
    }

    /// Roles held by the current user.
    pub async fn mine(&self) -> Result<Vec<UserRole>, ApiError> {
        self.client.get_json(self.endpoints.roles_user.as_str()).await
    }

    pub async fn assign(&self, user_id: i64, role_id: i64) -> Result<AssignmentReceipt, ApiError> {
        self.client
            .post_json(
                self.endpoints.roles_assign.as_str(),
                &RoleAssignment { user_id, role_id },
            )
            .await
    }

    /// Assign one role to several users concurrently. Fails on the first error.
    pub async fn assign_many(
        &self,
        user_ids: &[i64],
        role_id: i64,
    ) -> Result<Vec<AssignmentReceipt>, ApiError> {
        try_join_all(user_ids.iter().map(|&user_id| self.assign(user_id, role_id))).await
    }
}
