#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use authrelay_core::{
    ApiClient, ApiError, Credential, CredentialStore, RequestDescriptor, Response, Transport,
};
use tokio::sync::Semaphore;

pub const REFRESH_PATH: &str = "/auth/refresh/";

/// Path the fake backend rejects no matter which token is presented.
pub const ALWAYS_REJECTED: &str = "/always-rejected";

pub enum Renewal {
    Issue(&'static str),
    Reject,
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub path: String,
    pub bearer: Option<String>,
    pub attempt: u32,
}

/// In-process backend: accepts exactly one token and renews behind a gate
/// so tests can pile up waiters before the renewal settles.
pub struct FakeBackend {
    accepted: Mutex<String>,
    renewal: Renewal,
    gate: Semaphore,
    refresh_calls: AtomicUsize,
    log: Mutex<Vec<Sent>>,
}

impl FakeBackend {
    pub fn new(renewal: Renewal) -> Arc<Self> {
        Arc::new(Self {
            accepted: Mutex::new("not-yet-issued".to_string()),
            renewal,
            gate: Semaphore::new(0),
            refresh_calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn release_renewal(&self) {
        self.gate.add_permits(1);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    pub fn replays(&self) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.attempt > 0).collect()
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response, ApiError> {
        self.log.lock().unwrap().push(Sent {
            path: request.path.clone(),
            bearer: request.bearer().map(str::to_string),
            attempt: request.attempt(),
        });

        if request.path == REFRESH_PATH {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.expect("gate open").forget();
            return match self.renewal {
                Renewal::Issue(token) => {
                    *self.accepted.lock().unwrap() = token.to_string();
                    Ok(Response::new(200, format!(r#"{{"access": "{}"}}"#, token)))
                }
                Renewal::Reject => Err(ApiError::from_status(
                    401,
                    r#"{"detail": "Token is invalid or expired"}"#,
                )),
            };
        }

        let accepted = self.accepted.lock().unwrap().clone();
        if request.path != ALWAYS_REJECTED && request.bearer() == Some(accepted.as_str()) {
            Ok(Response::new(
                200,
                format!(r#"{{"path": "{}", "token": "{}"}}"#, request.path, accepted),
            ))
        } else {
            Err(ApiError::from_status(401, r#"{"message": "Unauthorized - invalid token"}"#))
        }
    }
}

pub fn client_with(backend: Arc<FakeBackend>, token: &str) -> ApiClient {
    let store = Arc::new(CredentialStore::in_memory());
    store.set(Credential::new(token).with_refresh(Some("R1".to_string())));
    ApiClient::new(backend, store, REFRESH_PATH, None)
}

/// Yield until `cond` holds.
pub async fn until(mut cond: impl FnMut() -> bool) {
    while !cond() {
        tokio::task::yield_now().await;
    }
}
