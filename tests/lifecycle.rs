//! Coordinator ordering across multiple subsystems.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mcp_runtime::lifecycle::{Coordinator, LifecycleError, LifecycleState, Supervisor};

mod common;
use common::{recording_supervisor, EventLog};

#[tokio::test]
async fn failed_start_rolls_back_in_reverse() {
    let log = EventLog::default();
    let mut coordinator = Coordinator::new();
    coordinator
        .register(recording_supervisor("a", &log, false))
        .register(recording_supervisor("b", &log, false))
        .register(recording_supervisor("c", &log, true))
        .register(recording_supervisor("d", &log, false));

    coordinator.initialize_all().unwrap();
    let err = coordinator.start_all(CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Hook { ref subsystem, .. } if subsystem == "c"));
    assert_eq!(
        log.events(),
        vec!["start:a", "start:b", "start:c", "stop:b", "stop:a"]
    );

    let states: Vec<_> = coordinator.status().into_iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![
            LifecycleState::Stopped,
            LifecycleState::Stopped,
            LifecycleState::Error,
            LifecycleState::Initialized,
        ]
    );
}

#[tokio::test]
async fn stop_runs_in_reverse_registration_order() {
    let log = EventLog::default();
    let mut coordinator = Coordinator::new();
    for name in ["metrics", "sessions", "transport"] {
        coordinator.register(recording_supervisor(name, &log, false));
    }

    coordinator.initialize_all().unwrap();
    coordinator.start_all(CancellationToken::new()).await.unwrap();
    assert!(coordinator.is_healthy());

    coordinator.stop_all(CancellationToken::new()).await.unwrap();
    assert_eq!(
        log.matching("stop:"),
        vec!["stop:transport", "stop:sessions", "stop:metrics"]
    );
    assert!(coordinator
        .status()
        .iter()
        .all(|s| s.state == LifecycleState::Stopped));
}

#[tokio::test]
async fn stop_all_collects_every_failure() {
    let log = EventLog::default();
    let failing = Supervisor::new("flaky");
    failing
        .on_stop(|_ctx| async { Err::<(), _>("disk gone") })
        .unwrap();

    let mut coordinator = Coordinator::new();
    coordinator
        .register(recording_supervisor("first", &log, false))
        .register(failing)
        .register(recording_supervisor("last", &log, false));

    coordinator.initialize_all().unwrap();
    coordinator.start_all(CancellationToken::new()).await.unwrap();

    let err = coordinator.stop_all(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.len(), 1);
    assert_eq!(log.matching("stop:"), vec!["stop:last", "stop:first"]);
}

#[tokio::test(start_paused = true)]
async fn stop_deadline_cancels_slow_hook() {
    let slow = Supervisor::new("slow");
    slow.on_stop(|_ctx| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<(), &'static str>(())
    })
    .unwrap();

    let mut coordinator = Coordinator::new();
    coordinator.register(slow);
    coordinator.initialize_all().unwrap();
    coordinator.start_all(CancellationToken::new()).await.unwrap();

    let deadline = mcp_runtime::lifecycle::shutdown::deadline_token(Duration::from_secs(5));
    let err = coordinator.stop_all(deadline).await.unwrap_err();
    match &err.errors()[0] {
        LifecycleError::Multi(hooks) => {
            assert!(matches!(hooks.errors()[0], LifecycleError::Cancelled { phase: "stop", .. }))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(coordinator.status()[0].state, LifecycleState::Stopped);
}
