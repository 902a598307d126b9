//! Multi-subsystem startup and shutdown.
//!
//! # Responsibilities
//! - Initialize and start subsystems in registration (dependency) order
//! - Roll back already-started subsystems when a later one fails
//! - Stop every subsystem in reverse order, collecting all failures
//!
//! # Design Decisions
//! - Fail fast on start: the original start error is authoritative
//! - Rollback is best-effort; secondary stop errors are only logged
//! - Stop never short-circuits: operators see every shutdown failure

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::lifecycle::error::{LifecycleError, MultiError};
use crate::lifecycle::state::LifecycleState;
use crate::lifecycle::subsystem::{ManagedSubsystem, SubsystemStatus};

/// Drives an ordered list of subsystems as a single unit.
#[derive(Default)]
pub struct Coordinator {
    units: Vec<Arc<dyn ManagedSubsystem>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subsystem. Register leaves first.
    pub fn register<S>(&mut self, unit: S) -> &mut Self
    where
        S: ManagedSubsystem + 'static,
    {
        tracing::debug!(subsystem = %unit.name(), position = self.units.len(), "Subsystem registered");
        self.units.push(Arc::new(unit));
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Initialize every subsystem that is still `Uninitialized`.
    pub fn initialize_all(&self) -> Result<(), LifecycleError> {
        for unit in &self.units {
            if unit.status().state == LifecycleState::Uninitialized {
                unit.initialize()?;
            }
        }
        Ok(())
    }

    /// Start every subsystem in order.
    ///
    /// If one fails, every previously started subsystem is stopped in reverse
    /// order and the original error is returned. Later subsystems are never
    /// started.
    pub async fn start_all(&self, ctx: CancellationToken) -> Result<(), LifecycleError> {
        if self.is_empty() {
            tracing::warn!("No subsystems registered, nothing to start");
        }
        for (position, unit) in self.units.iter().enumerate() {
            if let Err(err) = unit.start(ctx.clone()).await {
                tracing::error!(
                    subsystem = %unit.name(),
                    error = %err,
                    started = position,
                    "Startup failed, rolling back started subsystems"
                );
                self.rollback(&self.units[..position]).await;
                return Err(err);
            }
        }
        tracing::info!(subsystems = self.len(), "All subsystems started");
        Ok(())
    }

    /// Stop every subsystem in reverse order, collecting every error.
    pub async fn stop_all(&self, ctx: CancellationToken) -> Result<(), MultiError> {
        let mut failures = MultiError::new();
        for unit in self.units.iter().rev() {
            if let Err(err) = unit.stop(ctx.clone()).await {
                tracing::warn!(subsystem = %unit.name(), error = %err, "Subsystem stop failed");
                failures.push(err);
            }
        }
        if failures.is_empty() {
            tracing::info!(subsystems = self.units.len(), "All subsystems stopped");
        }
        failures.into_result()
    }

    /// Status of every subsystem, in registration order.
    pub fn status(&self) -> Vec<SubsystemStatus> {
        self.units.iter().map(|unit| unit.status()).collect()
    }

    /// True when every subsystem is running.
    pub fn is_healthy(&self) -> bool {
        self.units
            .iter()
            .all(|unit| unit.status().state == LifecycleState::Running)
    }

    async fn rollback(&self, started: &[Arc<dyn ManagedSubsystem>]) {
        // Rollback gets its own token: the caller's may already be cancelled.
        let ctx = CancellationToken::new();
        for unit in started.iter().rev() {
            if let Err(err) = unit.stop(ctx.clone()).await {
                tracing::warn!(subsystem = %unit.name(), error = %err, "Rollback stop failed");
            }
        }
    }
}
