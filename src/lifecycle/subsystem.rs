//! The managed-subsystem contract and its instrumentation decorator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::state::LifecycleState;
use crate::observability::metrics;

/// Read-only status snapshot of one subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsystemStatus {
    pub name: String,
    pub state: LifecycleState,
    /// Wall-clock time of the most recent start attempt.
    pub started_at_unix_secs: Option<u64>,
    /// Only present while `Running`.
    pub uptime_secs: Option<f64>,
    pub last_error: Option<String>,
}

/// Anything whose start/stop the coordinator can drive.
#[async_trait]
pub trait ManagedSubsystem: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(&self) -> Result<(), LifecycleError>;

    async fn start(&self, ctx: CancellationToken) -> Result<(), LifecycleError>;

    async fn stop(&self, ctx: CancellationToken) -> Result<(), LifecycleError>;

    fn status(&self) -> SubsystemStatus;
}

#[async_trait]
impl<T: ManagedSubsystem + ?Sized> ManagedSubsystem for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn initialize(&self) -> Result<(), LifecycleError> {
        (**self).initialize()
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), LifecycleError> {
        (**self).start(ctx).await
    }

    async fn stop(&self, ctx: CancellationToken) -> Result<(), LifecycleError> {
        (**self).stop(ctx).await
    }

    fn status(&self) -> SubsystemStatus {
        (**self).status()
    }
}

/// Decorator adding spans and lifecycle metrics to any subsystem.
///
/// Forwards the whole contract unchanged; wrap at construction time:
/// `Instrumented::new(store_supervisor)`.
pub struct Instrumented<S> {
    inner: S,
}

impl<S: ManagedSubsystem> Instrumented<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn observe(&self) {
        let status = self.inner.status();
        metrics::record_lifecycle_transition(&status.name, status.state);
        metrics::record_subsystem_up(&status.name, status.state == LifecycleState::Running);
    }
}

#[async_trait]
impl<S: ManagedSubsystem> ManagedSubsystem for Instrumented<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn initialize(&self) -> Result<(), LifecycleError> {
        let result = self.inner.initialize();
        self.observe();
        result
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), LifecycleError> {
        let span = tracing::info_span!("subsystem_start", subsystem = %self.inner.name());
        let result = self.inner.start(ctx).instrument(span).await;
        self.observe();
        result
    }

    async fn stop(&self, ctx: CancellationToken) -> Result<(), LifecycleError> {
        let span = tracing::info_span!("subsystem_stop", subsystem = %self.inner.name());
        let result = self.inner.stop(ctx).instrument(span).await;
        self.observe();
        result
    }

    fn status(&self) -> SubsystemStatus {
        self.inner.status()
    }
}
