//! Session pool behavior through the public API and the sweeper subsystem.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use mcp_runtime::lifecycle::{Coordinator, Instrumented};
use mcp_runtime::session::{
    sweeper_supervisor, SessionError, SessionFilter, SessionLimits, SessionStatus, SessionStore,
};

fn store(ttl_secs: u64, max_sessions: usize) -> Arc<SessionStore> {
    Arc::new(SessionStore::new(SessionLimits {
        ttl: Duration::from_secs(ttl_secs),
        max_sessions,
    }))
}

#[tokio::test]
async fn get_or_create_is_idempotent() {
    let store = store(60, 10);
    let first = store.get_or_create("s1").unwrap();
    let again = store.get_or_create("s1").unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(first.created_at, again.created_at);
    assert_eq!(store.len(), 1);
    assert_eq!(again.status, SessionStatus::Active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_get_or_create_yields_one_session() {
    const CALLERS: usize = 16;
    let store = store(60, 10);
    let barrier = Arc::new(Barrier::new(CALLERS));

    let tasks: Vec<_> = (0..CALLERS)
        .map(|_| {
            let store = store.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                store.get_or_create("k").unwrap()
            })
        })
        .collect();

    let mut sessions = Vec::with_capacity(CALLERS);
    for task in tasks {
        sessions.push(task.await.unwrap());
    }

    assert_eq!(store.len(), 1);
    let first = &sessions[0];
    for session in &sessions {
        assert_eq!(session.id, "k");
        assert_eq!(session.created_at, first.created_at);
        assert_eq!(session.expires_at, first.expires_at);
        assert_eq!(session.revision, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_repo_lookups_share_one_session() {
    const CALLERS: usize = 16;
    const REPO: &str = "https://github.com/acme/app";
    let store = store(60, 10);
    let barrier = Arc::new(Barrier::new(CALLERS));

    let tasks: Vec<_> = (0..CALLERS)
        .map(|_| {
            let store = store.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                store.get_or_create_for_repo(REPO).unwrap().id
            })
        })
        .collect();

    let mut ids = Vec::with_capacity(CALLERS);
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.dedup();

    assert_eq!(ids.len(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.find_by_repo(REPO).unwrap().id, ids[0]);
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_swept_then_not_found() {
    let store = store(10, 10);
    store.get_or_create("short-lived").unwrap();

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(store.get("short-lived").unwrap().status, SessionStatus::Expired);
    assert_eq!(
        store.list(&SessionFilter::with_status(SessionStatus::Expired)).unwrap().len(),
        1
    );

    assert_eq!(store.cleanup().unwrap(), 1);
    assert!(matches!(store.get("short-lived"), Err(SessionError::NotFound(id)) if id == "short-lived"));
    assert_eq!(store.stats().active, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_are_not_lost() {
    let store = store(600, 10);
    store.get_or_create("counter").unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update("counter", |s| {
                        let n = s.metadata.get("n").and_then(|v| v.as_u64()).unwrap_or(0);
                        s.metadata.insert("n".into(), (n + 1).into());
                        Ok::<(), std::convert::Infallible>(())
                    })
                    .unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let session = store.get("counter").unwrap();
    assert_eq!(session.metadata["n"], 32);
    assert_eq!(session.revision, 32);
}

#[tokio::test(start_paused = true)]
async fn sweeper_subsystem_removes_expired_sessions() {
    let store = store(30, 10);
    let mut coordinator = Coordinator::new();
    coordinator.register(Instrumented::new(
        sweeper_supervisor(store.clone(), Duration::from_secs(60)).unwrap(),
    ));
    coordinator.initialize_all().unwrap();
    coordinator.start_all(CancellationToken::new()).await.unwrap();

    store.get_or_create("a").unwrap();
    tokio::time::advance(Duration::from_secs(45)).await;
    store.get_or_create("b").unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(store.get("a").is_err());
    assert_eq!(store.get("b").unwrap().status, SessionStatus::Active);

    coordinator.stop_all(CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn capacity_evicts_least_recently_updated() {
    let store = store(600, 2);
    store.get_or_create("old").unwrap();
    store.get_or_create("newer").unwrap();
    store
        .update("old", |s| {
            s.stage = Some("touched".into());
            Ok::<(), std::convert::Infallible>(())
        })
        .unwrap();

    store.get_or_create("newest").unwrap();
    assert_eq!(store.len(), 2);
    assert!(store.get("newer").is_err());
    assert!(store.get("old").is_ok());
}
