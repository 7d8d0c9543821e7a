//! Data models for the backend's auth, user and role resources.
//!
//! - `User`, `NewUser`: accounts
//! - `Role`, `UserRole`, `NewRole`, `RoleAssignment`: role management
//! - Auth wire types: `LoginRequest`, `LoginResponse`, `RefreshRequest`, ...

pub mod auth;
pub mod role;
pub mod user;

pub use auth::{LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, RefreshResponse};
pub use role::{AssignmentReceipt, NewRole, Role, RoleAssignment, UserRole};
pub use user::{NewUser, User};
