//! Single-flight credential renewal.
//!
//! The first caller to report an expired credential becomes the *leader* and
//! performs the one renewal call. Everyone who reports expiry while that call
//! is in flight becomes a *waiter* and is parked on a oneshot channel. When the
//! renewal settles, the leader resolves every waiter in arrival order with the
//! same outcome.
//!
//! A renewal that answers without a token (the backend rotated a session
//! cookie instead) settles with `None`: callers replay without a bearer.
//!
//! `in_flight` and `waiters` live behind a `std::sync::Mutex` that is only ever
//! held between suspension points, so the leader is marked before it awaits
//! anything and no second caller can slip in as a false leader.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::request::RequestDescriptor;
use super::transport::Transport;
use super::ApiError;
use crate::auth::{Credential, CredentialStore, EventBus, SessionEvent};
use crate::models::{RefreshRequest, RefreshResponse};

// ============================================================================
// Constants
// ============================================================================

/// Reported to waiters whose leader went away before settling.
const ABANDONED: &str = "renewal abandoned before completion";

/// `None` is a cookie renewal: nothing to inject on replay.
type Outcome = Result<Option<Credential>, ApiError>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<Outcome>>,
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<Outcome>),
    /// Someone already renewed past the token the caller failed with.
    AlreadyRenewed(Credential),
}

pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    events: EventBus,
    refresh_path: String,
    timeout: Option<Duration>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        events: EventBus,
        refresh_path: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::default()),
            transport,
            credentials,
            events,
            refresh_path: refresh_path.into(),
            timeout,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a renewal call is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.lock_state().in_flight
    }

    /// Number of callers parked behind the in-flight renewal.
    pub fn waiting(&self) -> usize {
        self.lock_state().waiters.len()
    }

    /// Obtain a fresh credential after `stale` was rejected.
    ///
    /// Leads a renewal, joins the one in flight, or returns immediately if the
    /// stored credential has already moved past `stale`. `Ok(None)` means the
    /// session was renewed by cookie and there is no bearer to inject.
    pub async fn refresh(&self, stale: Option<&str>) -> Outcome {
        let role = {
            let mut state = self.lock_state();
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                debug!(position = state.waiters.len(), "Renewal in flight, queued as waiter");
                Role::Waiter(rx)
            } else {
                match self.credentials.get() {
                    Some(current) if stale.is_some_and(|s| s != current.access) => {
                        Role::AlreadyRenewed(current)
                    }
                    _ => {
                        state.in_flight = true;
                        Role::Leader
                    }
                }
            }
        };

        match role {
            Role::Leader => self.lead().await,
            Role::Waiter(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ApiError::RefreshFailure(ABANDONED.to_string()))),
            Role::AlreadyRenewed(current) => {
                debug!("Credential already renewed, skipping renewal");
                Ok(Some(current))
            }
        }
    }

    async fn lead(&self) -> Outcome {
        let guard = LeaderGuard {
            coordinator: self,
            settled: false,
        };
        info!("Renewing credential");

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.renew()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ApiError::RefreshTimeout),
            },
            None => self.renew().await,
        };

        match outcome {
            Ok(Some(ref credential)) => {
                self.credentials.set(credential.clone());
                info!("Credential renewed");
                self.events.emit(SessionEvent::Renewed);
            }
            Ok(None) => {
                // The cookie jar carries the new session; a bearer would be stale.
                self.credentials.clear();
                info!("Session cookie renewed");
                self.events.emit(SessionEvent::Renewed);
            }
            Err(ref e) => {
                error!(error = %e, "Credential renewal failed, ending session");
                self.credentials.clear();
                self.events.emit(SessionEvent::Invalidated {
                    reason: e.to_string(),
                });
            }
        }

        guard.settle(&outcome);
        outcome
    }

    /// The renewal call itself. A 401 here is terminal, never re-routed.
    /// A 2xx without a token is a cookie renewal.
    async fn renew(&self) -> Outcome {
        let renewal_token = self.credentials.get().and_then(|c| c.refresh);
        let request = RequestDescriptor::post(self.refresh_path.as_str())
            .unauthenticated()
            .json(&RefreshRequest {
                refresh: renewal_token.clone(),
            })
            .map_err(|e| ApiError::RefreshFailure(e.message()))?;

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| ApiError::RefreshFailure(e.message()))?;
        let renewed: RefreshResponse = if response.is_empty() {
            RefreshResponse::default()
        } else {
            response
                .json()
                .map_err(|e| ApiError::RefreshFailure(e.message()))?
        };

        Ok(renewed.access.map(|access| Credential {
            access,
            refresh: renewed.refresh.or(renewal_token),
            issued_at: Utc::now(),
        }))
    }

    /// Return to idle and hand `outcome` to every waiter, oldest first.
    fn drain(&self, outcome: &Outcome) {
        let waiters = {
            let mut state = self.lock_state();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            debug!(count = waiters.len(), ok = outcome.is_ok(), "Releasing renewal waiters");
        }
        for waiter in waiters {
            // A waiter whose caller went away is simply skipped.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Releases waiters even if the leader's future is dropped mid-renewal.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl LeaderGuard<'_> {
    fn settle(mut self, outcome: &Outcome) {
        self.settled = true;
        self.coordinator.drain(outcome);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Renewal leader dropped before completion, failing waiters");
            self.coordinator
                .drain(&Err(ApiError::RefreshFailure(ABANDONED.to_string())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::request::Response;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Renewal endpoint that blocks until released.
    struct GatedRenewal {
        gate: Semaphore,
        calls: AtomicUsize,
        answer: Result<&'static str, u16>,
    }

    fn renewed(outcome: Outcome) -> Credential {
        outcome.expect("renewal succeeded").expect("token issued")
    }

    impl GatedRenewal {
        fn new(answer: Result<&'static str, u16>) -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                calls: AtomicUsize::new(0),
                answer,
            })
        }
    }

    #[async_trait]
    impl Transport for GatedRenewal {
        async fn send(&self, request: &RequestDescriptor) -> Result<Response, ApiError> {
            assert!(!request.is_authenticated());
            self.calls.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await.expect("gate open");
            permit.forget();
            match self.answer {
                // An empty token answers like a cookie-session backend.
                Ok("") => Ok(Response::new(200, "")),
                Ok(token) => Ok(Response::new(200, format!(r#"{{"access": "{}"}}"#, token))),
                Err(status) => Err(ApiError::from_status(status, r#"{"detail": "Token is invalid or expired"}"#)),
            }
        }
    }

    fn coordinator(transport: Arc<GatedRenewal>, timeout: Option<Duration>) -> Arc<RefreshCoordinator> {
        let store = Arc::new(CredentialStore::in_memory());
        store.set(Credential::new("T1").with_refresh(Some("R1".into())));
        Arc::new(RefreshCoordinator::new(
            transport,
            store,
            EventBus::new(),
            "/auth/refresh/",
            timeout,
        ))
    }

    async fn until(mut cond: impl FnMut() -> bool) {
        while !cond() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_waiters_share_leader_outcome() {
        let renewal = GatedRenewal::new(Ok("T2"));
        let coord = coordinator(renewal.clone(), None);

        let leader = tokio::spawn({
            let coord = coord.clone();
            async move { coord.refresh(Some("T1")).await }
        });
        until(|| coord.is_refreshing()).await;

        let waiter = tokio::spawn({
            let coord = coord.clone();
            async move { coord.refresh(Some("T1")).await }
        });
        until(|| coord.waiting() == 1).await;

        renewal.gate.add_permits(1);
        let a = renewed(leader.await.unwrap());
        let b = renewed(waiter.await.unwrap());
        assert_eq!(a.access, "T2");
        assert_eq!(b.access, "T2");
        // Renewal token kept when the backend does not rotate it.
        assert_eq!(a.refresh.as_deref(), Some("R1"));
        assert_eq!(renewal.calls.load(Ordering::SeqCst), 1);
        assert!(!coord.is_refreshing());
        assert_eq!(coord.waiting(), 0);
    }

    #[tokio::test]
    async fn test_stale_token_short_circuits() {
        let renewal = GatedRenewal::new(Ok("unused"));
        let coord = coordinator(renewal.clone(), None);

        let current = renewed(coord.refresh(Some("T0")).await);
        assert_eq!(current.access, "T1");
        assert_eq!(renewal.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_renewal_401_is_terminal_failure() {
        let renewal = GatedRenewal::new(Err(401));
        let coord = coordinator(renewal.clone(), None);
        let mut events = coord.events.subscribe();
        renewal.gate.add_permits(1);

        let err = coord.refresh(Some("T1")).await.expect_err("renewal rejected");
        assert_eq!(err, ApiError::RefreshFailure("Token is invalid or expired".into()));
        assert!(coord.credentials.get().is_none());
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Invalidated { .. })));
        assert_eq!(renewal.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tokenless_renewal_is_cookie_success() {
        let renewal = GatedRenewal::new(Ok(""));
        let coord = coordinator(renewal.clone(), None);
        let mut events = coord.events.subscribe();
        renewal.gate.add_permits(1);

        let outcome = coord.refresh(Some("T1")).await.expect("cookie renewal succeeds");
        assert!(outcome.is_none());
        // The old bearer must not be replayed alongside the new cookie.
        assert!(coord.credentials.get().is_none());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Renewed);
        assert!(!coord.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_timeout_fails_everyone() {
        let renewal = GatedRenewal::new(Ok("never"));
        let coord = coordinator(renewal.clone(), Some(Duration::from_secs(5)));

        let leader = tokio::spawn({
            let coord = coord.clone();
            async move { coord.refresh(Some("T1")).await }
        });
        until(|| coord.is_refreshing()).await;
        let waiter = tokio::spawn({
            let coord = coord.clone();
            async move { coord.refresh(Some("T1")).await }
        });
        until(|| coord.waiting() == 1).await;

        assert_eq!(leader.await.unwrap(), Err(ApiError::RefreshTimeout));
        assert_eq!(waiter.await.unwrap(), Err(ApiError::RefreshTimeout));
        assert!(coord.credentials.get().is_none());
        assert!(!coord.is_refreshing());
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let renewal = GatedRenewal::new(Ok("T2"));
        let coord = coordinator(renewal.clone(), None);

        let leader = tokio::spawn({
            let coord = coord.clone();
            async move { coord.refresh(Some("T1")).await }
        });
        until(|| coord.is_refreshing()).await;
        let waiter = tokio::spawn({
            let coord = coord.clone();
            async move { coord.refresh(Some("T1")).await }
        });
        until(|| coord.waiting() == 1).await;

        leader.abort();
        let err = waiter.await.unwrap().expect_err("leader gone");
        assert!(matches!(err, ApiError::RefreshFailure(_)));
        assert!(!coord.is_refreshing());
        // Abandonment is not a renewal failure; the credential is untouched.
        assert_eq!(coord.credentials.access_token().as_deref(), Some("T1"));
    }
}
