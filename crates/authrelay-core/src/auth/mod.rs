//! Credential and session management.
//!
//! This module provides:
//! - `CredentialStore`: the current credential, mirrored to a durable slot
//! - `CredentialSlot` implementations: memory, file (optionally sealed), OS keychain
//! - `SessionState`: the `{user, is_authenticated, loading, error}` projection
//! - `EventBus` / `SessionEvent`: session lifecycle notifications

pub mod cipher;
pub mod credentials;
pub mod events;
pub mod session;
pub mod slots;

pub use credentials::{Credential, CredentialStore};
pub use events::{EventBus, EventCursor, SessionEvent};
pub use session::{Session, SessionState};
pub use slots::{CredentialSlot, FileSlot, KeyringSlot, MemorySlot, SlotError};
