use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Capacity of the session event channel.
/// Slow subscribers skip ahead rather than block publishers.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Session lifecycle notifications for UI and navigation collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { username: String },
    Renewed,
    LoggedOut,
    /// The session can no longer be recovered; callers should re-authenticate.
    Invalidated { reason: String },
}

/// Broadcast fan-out of [`SessionEvent`]s. Cloning shares the channel.
///
/// Every emitted event has a position: the number of events emitted before
/// it. Positions let a consumer tell events that predate a state change it
/// made itself from ones that follow it.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    emitted: Arc<Mutex<u64>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            emitted: Arc::new(Mutex::new(0)),
        }
    }

    fn lock_emitted(&self) -> MutexGuard<'_, u64> {
        self.emitted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// A receiver that also reports each event's position.
    pub fn cursor(&self) -> EventCursor {
        // Held so no emit lands between subscribing and reading the count.
        let emitted = self.lock_emitted();
        EventCursor {
            rx: self.tx.subscribe(),
            next: *emitted,
        }
    }

    /// Position the next emitted event will take.
    pub fn position(&self) -> u64 {
        *self.lock_emitted()
    }

    pub fn emit(&self, event: SessionEvent) {
        trace!(?event, "Session event");
        let mut emitted = self.lock_emitted();
        *emitted += 1;
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

/// Positioned view over the bus, see [`EventBus::cursor`].
#[derive(Debug)]
pub struct EventCursor {
    rx: broadcast::Receiver<SessionEvent>,
    next: u64,
}

impl EventCursor {
    /// Next event and its position, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<(u64, SessionEvent)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    let position = self.next;
                    self.next += 1;
                    return Some((position, event));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session event consumer lagged behind");
                    self.next += skipped;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
