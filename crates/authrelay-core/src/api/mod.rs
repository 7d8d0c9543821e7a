//! REST API client module.
//!
//! `ApiClient` is the authenticated facade every domain module goes through.
//! It wraps a `Transport` with credential injection and a `RefreshCoordinator`
//! that renews an expired credential once for all concurrent callers and
//! replays their requests.
//!
//! Domain modules: `AuthService` (login/logout/info), `UsersApi`, `RolesApi`.

pub mod auth;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod request;
pub mod roles;
pub mod transport;
pub mod users;

pub use auth::AuthService;
pub use client::ApiClient;
pub use coordinator::RefreshCoordinator;
pub use error::ApiError;
pub use request::{RequestDescriptor, Response};
pub use roles::RolesApi;
pub use transport::{HttpTransport, Transport};
pub use users::UsersApi;
