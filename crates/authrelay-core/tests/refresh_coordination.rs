mod common;

use std::sync::{Arc, Mutex};

use authrelay_core::{ApiClient, ApiError, RequestDescriptor, Response, SessionEvent};
use common::{client_with, until, FakeBackend, Renewal, ALWAYS_REJECTED};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;

type Outcome = Result<Response, ApiError>;

/// Issue `n` requests with a stale token, one at a time, making sure each has
/// reached the coordinator before the next starts. The first one leads.
async fn pile_up(
    client: &ApiClient,
    n: usize,
    finished: Arc<Mutex<Vec<usize>>>,
) -> Vec<JoinHandle<Outcome>> {
    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let c = client.clone();
        let finished = finished.clone();
        handles.push(tokio::spawn(async move {
            let outcome = c.request(RequestDescriptor::get(format!("/data/{}", i))).await;
            finished.lock().unwrap().push(i);
            outcome
        }));
        if i == 0 {
            until(|| client.coordinator().is_refreshing()).await;
        } else {
            until(|| client.coordinator().waiting() == i).await;
        }
    }
    handles
}

fn count_invalidations(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> usize {
    let mut count = 0;
    loop {
        match rx.try_recv() {
            Ok(SessionEvent::Invalidated { .. }) => count += 1,
            Ok(_) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return count,
            Err(TryRecvError::Lagged(_)) => {}
        }
    }
}

#[tokio::test]
async fn test_concurrent_expiries_trigger_single_renewal() {
    let backend = FakeBackend::new(Renewal::Issue("T2"));
    let client = client_with(backend.clone(), "T1");
    let finished = Arc::new(Mutex::new(Vec::new()));

    let handles = pile_up(&client, 8, finished).await;
    assert_eq!(backend.refresh_calls(), 1);
    backend.release_renewal();

    for handle in handles {
        let resp = handle.await.unwrap().expect("replayed after renewal");
        assert!(resp.body.contains(r#""token": "T2""#));
    }

    assert_eq!(backend.refresh_calls(), 1);
    let replays = backend.replays();
    assert_eq!(replays.len(), 8);
    assert!(replays.iter().all(|s| s.bearer.as_deref() == Some("T2")));
    assert!(!client.coordinator().is_refreshing());
    assert_eq!(client.coordinator().waiting(), 0);
    assert_eq!(client.credentials().access_token().as_deref(), Some("T2"));
}

#[tokio::test(flavor = "current_thread")]
async fn test_waiters_resolve_in_arrival_order() {
    let backend = FakeBackend::new(Renewal::Issue("T2"));
    let client = client_with(backend.clone(), "T1");
    let finished = Arc::new(Mutex::new(Vec::new()));

    let handles = pile_up(&client, 5, finished.clone()).await;
    backend.release_renewal();
    for handle in handles {
        handle.await.unwrap().expect("replayed");
    }

    assert_eq!(*finished.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_failed_renewal_fails_every_caller_uniformly() {
    let backend = FakeBackend::new(Renewal::Reject);
    let client = client_with(backend.clone(), "T1");
    let mut events = client.subscribe();
    let finished = Arc::new(Mutex::new(Vec::new()));

    let handles = pile_up(&client, 5, finished).await;
    backend.release_renewal();

    for handle in handles {
        let err = handle.await.unwrap().expect_err("renewal was rejected");
        assert_eq!(
            err,
            ApiError::RefreshFailure("Token is invalid or expired".to_string())
        );
    }

    assert_eq!(backend.refresh_calls(), 1);
    assert!(backend.replays().is_empty());
    assert!(client.credentials().get().is_none());
    assert_eq!(count_invalidations(&mut events), 1);
}

#[tokio::test]
async fn test_expiry_after_retry_never_renews_again() {
    let backend = FakeBackend::new(Renewal::Issue("T2"));
    backend.release_renewal();
    let client = client_with(backend.clone(), "T1");
    let mut events = client.subscribe();

    let err = client
        .request(RequestDescriptor::get(ALWAYS_REJECTED))
        .await
        .expect_err("rejected twice");

    assert!(matches!(err, ApiError::Auth { status: 401, .. }));
    assert_eq!(backend.refresh_calls(), 1);
    let attempts: Vec<u32> = backend
        .sent()
        .iter()
        .filter(|s| s.path == ALWAYS_REJECTED)
        .map(|s| s.attempt)
        .collect();
    assert_eq!(attempts, vec![0, 1]);
    assert_eq!(count_invalidations(&mut events), 1);
}

#[tokio::test]
async fn test_scenario_second_caller_joins_in_flight_renewal() {
    let backend = FakeBackend::new(Renewal::Issue("T2"));
    let client = client_with(backend.clone(), "T1");

    let r1 = tokio::spawn({
        let c = client.clone();
        async move { c.request(RequestDescriptor::get("/r1")).await }
    });
    until(|| client.coordinator().is_refreshing()).await;

    let r2 = tokio::spawn({
        let c = client.clone();
        async move { c.request(RequestDescriptor::get("/r2")).await }
    });
    until(|| client.coordinator().waiting() == 1).await;

    // R2 is parked, not replayed, while the renewal is in flight.
    assert!(backend.replays().is_empty());
    backend.release_renewal();

    let r1 = r1.await.unwrap().expect("R1 replayed");
    let r2 = r2.await.unwrap().expect("R2 replayed");
    assert!(r1.body.contains("/r1") && r1.body.contains("T2"));
    assert!(r2.body.contains("/r2") && r2.body.contains("T2"));

    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(client.coordinator().waiting(), 0);
    assert!(!client.coordinator().is_refreshing());
}

#[tokio::test]
async fn test_scenario_renewal_rejected_invalidates_once() {
    let backend = FakeBackend::new(Renewal::Reject);
    let client = client_with(backend.clone(), "T1");
    let mut events = client.subscribe();

    let r1 = tokio::spawn({
        let c = client.clone();
        async move { c.request(RequestDescriptor::get("/r1")).await }
    });
    until(|| client.coordinator().is_refreshing()).await;
    let r2 = tokio::spawn({
        let c = client.clone();
        async move { c.request(RequestDescriptor::get("/r2")).await }
    });
    until(|| client.coordinator().waiting() == 1).await;
    backend.release_renewal();

    assert!(matches!(r1.await.unwrap(), Err(ApiError::RefreshFailure(_))));
    assert!(matches!(r2.await.unwrap(), Err(ApiError::RefreshFailure(_))));
    assert!(client.credentials().get().is_none());
    assert_eq!(count_invalidations(&mut events), 1);
}

#[tokio::test]
async fn test_next_cycle_after_failure_starts_fresh() {
    let backend = FakeBackend::new(Renewal::Reject);
    let client = client_with(backend.clone(), "T1");
    backend.release_renewal();
    backend.release_renewal();

    let first = client.request(RequestDescriptor::get("/a")).await;
    assert!(matches!(first, Err(ApiError::RefreshFailure(_))));

    // No credential left; the next expiry leads a new cycle of its own.
    let second = client.request(RequestDescriptor::get("/b")).await;
    assert!(matches!(second, Err(ApiError::RefreshFailure(_))));
    assert_eq!(backend.refresh_calls(), 2);
}
