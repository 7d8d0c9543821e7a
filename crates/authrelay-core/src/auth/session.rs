use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::events::{EventCursor, SessionEvent};
use crate::models::User;

/// Consumer-facing view of the session.
///
/// Derived from auth action outcomes; request code never writes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub loading: bool,
    pub error: Option<String>,
}

/// Publishes [`Session`] snapshots over a watch channel.
///
/// Concurrent actions are not coordinated: whichever resolves last wins.
/// Events emitted before the latest [`establish`](Self::establish) are stale
/// and ignored by [`follow`](Self::follow).
#[derive(Debug)]
pub struct SessionState {
    tx: watch::Sender<Session>,
    established: AtomicU64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Session::default());
        Self {
            tx,
            established: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated
    }

    pub fn current_user(&self) -> Option<User> {
        self.tx.borrow().user.clone()
    }

    pub fn begin(&self) {
        self.tx.send_modify(|s| s.loading = true);
    }

    pub fn set_user(&self, user: Option<User>) {
        self.tx.send_modify(|s| {
            s.is_authenticated = user.is_some();
            s.user = user;
            s.loading = false;
        });
    }

    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|s| {
            s.error = Some(message);
            s.loading = false;
        });
    }

    pub fn clear_error(&self) {
        self.tx.send_modify(|s| s.error = None);
    }

    pub fn logged_out(&self) {
        self.tx.send_modify(|s| {
            s.user = None;
            s.is_authenticated = false;
            s.loading = false;
        });
    }

    /// Mark the projection as current as of bus position `position`.
    /// Events before it no longer apply.
    pub fn establish(&self, position: u64) {
        self.established.fetch_max(position, Ordering::SeqCst);
    }

    /// Fold a session event into the projection.
    pub fn apply(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Invalidated { reason } => {
                debug!(%reason, "Session invalidated");
                self.tx.send_modify(|s| {
                    s.user = None;
                    s.is_authenticated = false;
                    s.loading = false;
                    s.error = Some(reason.clone());
                });
            }
            SessionEvent::LoggedOut => self.logged_out(),
            SessionEvent::LoggedIn { .. } | SessionEvent::Renewed => {}
        }
    }

    /// Apply every event from `events` until the bus closes, skipping those
    /// that predate the latest `establish`.
    /// Must be called from within a Tokio runtime.
    pub fn follow(self: &Arc<Self>, mut events: EventCursor) -> JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            while let Some((position, event)) = events.recv().await {
                if position < state.established.load(Ordering::SeqCst) {
                    debug!(position, ?event, "Skipping stale session event");
                    continue;
                }
                state.apply(&event);
            }
        })
    }
}
