//! Periodic expiry sweep, run as the store's managed subsystem.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::schema::MAX_DURATION_SECS;
use crate::lifecycle::{HookError, LifecycleError, Supervisor};
use crate::session::store::SessionStore;

struct Sweep {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Supervisor named "sessions" that sweeps `store` every `interval` while
/// running and performs a final sweep when stopped.
pub fn sweeper_supervisor(
    store: Arc<SessionStore>,
    interval: Duration,
) -> Result<Supervisor, LifecycleError> {
    let supervisor = Supervisor::new("sessions");
    let running: Arc<Mutex<Option<Sweep>>> = Arc::new(Mutex::new(None));

    {
        let store = store.clone();
        let running = running.clone();
        supervisor.on_start(move |_ctx| {
            let stop = CancellationToken::new();
            let task = tokio::spawn(run_sweeper(store.clone(), interval, stop.clone()));
            *running.lock().unwrap_or_else(PoisonError::into_inner) = Some(Sweep { stop, task });
            tracing::info!(interval_secs = interval.as_secs(), "Session sweeper started");
            async { Ok::<(), HookError>(()) }
        })?;
    }

    supervisor.on_stop(move |_ctx| {
        let sweep = running.lock().unwrap_or_else(PoisonError::into_inner).take();
        let store = store.clone();
        async move {
            if let Some(sweep) = sweep {
                sweep.stop.cancel();
                if let Err(e) = sweep.task.await {
                    tracing::warn!(error = %e, "Session sweeper ended abnormally");
                }
            }
            let removed = store.cleanup()?;
            tracing::info!(removed, remaining = store.len(), "Session store stopped");
            Ok::<(), HookError>(())
        }
    })?;

    Ok(supervisor)
}

async fn run_sweeper(store: Arc<SessionStore>, interval: Duration, stop: CancellationToken) {
    let interval = interval.min(Duration::from_secs(MAX_DURATION_SECS));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = store.cleanup() {
                    tracing::error!(error = %e, "Session sweep failed");
                }
            }
        }
    }
}
