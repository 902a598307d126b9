//! Single-subsystem hook sequencing.
//!
//! A [`Supervisor`] owns the state machine for one subsystem. Start hooks
//! run in registration order and stop at the first failure; stop hooks run
//! in reverse order and always run to completion, collecting failures.
//! Rolling back other subsystems is the coordinator's job, not this one's.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::error::{HookError, LifecycleError, MultiError};
use crate::lifecycle::state::LifecycleState;
use crate::lifecycle::subsystem::{ManagedSubsystem, SubsystemStatus};

type Hook = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

struct Inner {
    state: LifecycleState,
    started_at: Option<SystemTime>,
    started_instant: Option<Instant>,
    last_error: Option<String>,
    start_hooks: Vec<Hook>,
    stop_hooks: Vec<Hook>,
}

/// State machine governing one subsystem's start/stop hooks.
pub struct Supervisor {
    name: String,
    inner: RwLock<Inner>,
    /// Serializes start/stop so readers never wait on a running hook.
    transition: Mutex<()>,
}

impl Supervisor {
    /// Create a supervisor in the `Uninitialized` state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                state: LifecycleState::Uninitialized,
                started_at: None,
                started_instant: None,
                last_error: None,
                start_hooks: Vec::new(),
                stop_hooks: Vec::new(),
            }),
            transition: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.read().state
    }

    /// Register a hook to run during `start`, after previously registered ones.
    pub fn on_start<F, Fut, E>(&self, hook: F) -> Result<(), LifecycleError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<HookError>,
    {
        let hook = box_hook(hook);
        let mut inner = self.write();
        if !inner.state.accepts_hooks() {
            return Err(self.invalid("register start hook", inner.state));
        }
        inner.start_hooks.push(hook);
        Ok(())
    }

    /// Register a hook to run during `stop`, before previously registered ones.
    pub fn on_stop<F, Fut, E>(&self, hook: F) -> Result<(), LifecycleError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<HookError>,
    {
        let hook = box_hook(hook);
        let mut inner = self.write();
        if !inner.state.accepts_hooks() {
            return Err(self.invalid("register stop hook", inner.state));
        }
        inner.stop_hooks.push(hook);
        Ok(())
    }

    /// Uninitialized → Initialized.
    pub fn initialize(&self) -> Result<(), LifecycleError> {
        let mut inner = self.write();
        if inner.state != LifecycleState::Uninitialized {
            return Err(self.invalid("initialize", inner.state));
        }
        inner.state = LifecycleState::Initialized;
        tracing::debug!(subsystem = %self.name, "Subsystem initialized");
        Ok(())
    }

    /// Run every start hook in order.
    ///
    /// The first failing hook moves the supervisor to `Error` and its error is
    /// returned; later hooks are skipped. Cancelling `ctx` while a hook runs
    /// counts as a failure of that hook.
    pub async fn start(&self, ctx: CancellationToken) -> Result<(), LifecycleError> {
        let _transition = self.transition.lock().await;

        let hooks = {
            let mut inner = self.write();
            if !inner.state.can_start() {
                return Err(self.invalid("start", inner.state));
            }
            inner.state = LifecycleState::Starting;
            inner.started_at = Some(SystemTime::now());
            inner.started_instant = Some(Instant::now());
            inner.last_error = None;
            inner.start_hooks.clone()
        };

        tracing::info!(subsystem = %self.name, hooks = hooks.len(), "Starting subsystem");

        for (index, hook) in hooks.iter().enumerate() {
            let outcome = tokio::select! {
                biased;
                _ = ctx.cancelled() => Err(LifecycleError::Cancelled {
                    subsystem: self.name.clone(),
                    phase: "start",
                    index,
                }),
                result = hook(ctx.clone()) => result.map_err(|source| LifecycleError::Hook {
                    subsystem: self.name.clone(),
                    phase: "start",
                    index,
                    source,
                }),
            };

            if let Err(err) = outcome {
                let mut inner = self.write();
                inner.state = LifecycleState::Error;
                inner.started_instant = None;
                inner.last_error = Some(err.to_string());
                tracing::error!(subsystem = %self.name, error = %err, "Subsystem failed to start");
                return Err(err);
            }
        }

        self.write().state = LifecycleState::Running;
        tracing::info!(subsystem = %self.name, "Subsystem running");
        Ok(())
    }

    /// Run every stop hook in reverse order.
    ///
    /// Always ends in `Stopped`. Hook failures (including hooks still running
    /// when `ctx` fires) are collected and returned as one aggregate error.
    pub async fn stop(&self, ctx: CancellationToken) -> Result<(), LifecycleError> {
        let _transition = self.transition.lock().await;

        let hooks = {
            let mut inner = self.write();
            if !inner.state.can_stop() {
                return Err(self.invalid("stop", inner.state));
            }
            inner.state = LifecycleState::Stopping;
            inner.stop_hooks.clone()
        };

        tracing::info!(subsystem = %self.name, hooks = hooks.len(), "Stopping subsystem");

        let mut failures = MultiError::new();
        for (index, hook) in hooks.iter().enumerate().rev() {
            let outcome = tokio::select! {
                biased;
                result = hook(ctx.clone()) => result.map_err(|source| LifecycleError::Hook {
                    subsystem: self.name.clone(),
                    phase: "stop",
                    index,
                    source,
                }),
                _ = ctx.cancelled() => Err(LifecycleError::Cancelled {
                    subsystem: self.name.clone(),
                    phase: "stop",
                    index,
                }),
            };

            if let Err(err) = outcome {
                tracing::warn!(subsystem = %self.name, error = %err, "Stop hook failed, continuing");
                failures.push(err);
            }
        }

        let mut inner = self.write();
        inner.state = LifecycleState::Stopped;
        inner.started_instant = None;

        match failures.into_result() {
            Ok(()) => {
                tracing::info!(subsystem = %self.name, "Subsystem stopped");
                Ok(())
            }
            Err(multi) => {
                inner.last_error = Some(multi.to_string());
                tracing::error!(subsystem = %self.name, failures = multi.len(), "Subsystem stopped with errors");
                Err(LifecycleError::Multi(multi))
            }
        }
    }

    /// Snapshot of the current status. Never waits on a running hook.
    pub fn status(&self) -> SubsystemStatus {
        let inner = self.read();
        let uptime = match (inner.state, inner.started_instant) {
            (LifecycleState::Running, Some(since)) => Some(since.elapsed()),
            _ => None,
        };
        SubsystemStatus {
            name: self.name.clone(),
            state: inner.state,
            started_at_unix_secs: inner
                .started_at
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            uptime_secs: uptime.map(|d| d.as_secs_f64()),
            last_error: inner.last_error.clone(),
        }
    }

    fn invalid(&self, operation: &'static str, state: LifecycleState) -> LifecycleError {
        LifecycleError::InvalidStateTransition {
            subsystem: self.name.clone(),
            operation,
            state,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn box_hook<F, Fut, E>(hook: F) -> Hook
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<HookError>,
{
    Arc::new(move |ctx: CancellationToken| {
        hook(ctx)
            .map(|result| result.map_err(Into::<HookError>::into))
            .boxed()
    })
}

#[async_trait]
impl ManagedSubsystem for Supervisor {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self) -> Result<(), LifecycleError> {
        Supervisor::initialize(self)
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), LifecycleError> {
        Supervisor::start(self, ctx).await
    }

    async fn stop(&self, ctx: CancellationToken) -> Result<(), LifecycleError> {
        Supervisor::stop(self, ctx).await
    }

    fn status(&self) -> SubsystemStatus {
        Supervisor::status(self)
    }
}
