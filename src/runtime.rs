//! Process assembly: builds every subsystem from a validated config and
//! drives them through start, serve and stop.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::watcher::{watcher_supervisor, ReloadCallback};
use crate::config::{Overrides, RuntimeConfig};
use crate::http::HttpTransport;
use crate::lifecycle::shutdown::deadline_token;
use crate::lifecycle::{Coordinator, Instrumented, LifecycleError, MultiError, Shutdown};
use crate::observability::metrics::exporter_supervisor;
use crate::rpc::{register_builtin, Router};
use crate::session::{sweeper_supervisor, SessionLimits, SessionStore};
use crate::transport::{StdioTransport, TransportError, TransportRegistry, TRANSPORT_HTTP, TRANSPORT_STDIO};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("startup failed: {0}")]
    Startup(#[source] LifecycleError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("shutdown incomplete: {0}")]
    Shutdown(#[from] MultiError),
}

/// Every long-lived component of one server process.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub store: Arc<SessionStore>,
    pub registry: Arc<TransportRegistry>,
    pub coordinator: Arc<Coordinator>,
    pub router: Arc<Router>,
}

impl Runtime {
    /// Wire up subsystems in start order: metrics exporter, config watcher,
    /// session store, transport. `config_path` enables hot reload when the
    /// config asks for it; `overrides` are re-applied to every reloaded file.
    pub fn build(
        config: RuntimeConfig,
        config_path: Option<&Path>,
        overrides: Overrides,
    ) -> Result<Self, LifecycleError> {
        let store = Arc::new(SessionStore::new(SessionLimits::from(&config.session)));
        let registry = Arc::new(TransportRegistry::new());

        let mut coordinator = Coordinator::new();

        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse::<SocketAddr>() {
                Ok(addr) => {
                    coordinator.register(Instrumented::new(exporter_supervisor(addr)?));
                }
                Err(e) => tracing::warn!(error = %e, "Invalid metrics address, exporter disabled"),
            }
        }

        if let (true, Some(path)) = (config.reload.enabled, config_path) {
            coordinator.register(Instrumented::new(watcher_supervisor(
                path.to_path_buf(),
                Duration::from_secs(config.reload.poll_interval_secs),
                reload_handler(store.clone(), overrides),
            )?));
        }

        coordinator
            .register(Instrumented::new(sweeper_supervisor(
                store.clone(),
                config.session.cleanup_interval(),
            )?))
            .register(Instrumented::new(registry.supervisor(config.transport.kind.clone())?));

        let coordinator = Arc::new(coordinator);

        registry.register(TRANSPORT_STDIO, StdioTransport::new(config.transport.stdio.max_line_bytes));
        registry.register(
            TRANSPORT_HTTP,
            HttpTransport::new(config.transport.http.clone()).with_status(&coordinator),
        );

        let mut router = Router::new();
        register_builtin(&mut router, store.clone(), Some(coordinator.clone()));
        tracing::debug!(methods = ?router.methods(), "RPC methods registered");
        tracing::info!(subsystems = coordinator.len(), transport = %config.transport.kind, "Runtime assembled");

        Ok(Self {
            config,
            store,
            registry,
            coordinator,
            router: Arc::new(router),
        })
    }

    /// Start everything, serve on the selected transport until it returns
    /// or `shutdown` fires, then stop everything under the shutdown deadline.
    ///
    /// A failed start means nothing is served; subsystems already started
    /// have been rolled back by the coordinator.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), RuntimeError> {
        self.coordinator.initialize_all().map_err(RuntimeError::Startup)?;
        self.coordinator
            .start_all(shutdown.token())
            .await
            .map_err(RuntimeError::Startup)?;

        let served = self
            .registry
            .start(shutdown.token(), &self.config.transport.kind, self.router.clone())
            .await;

        if !shutdown.is_triggered() {
            tracing::info!(transport = %self.config.transport.kind, "Transport stopped serving, shutting down");
        }
        shutdown.trigger();
        let stop_ctx = deadline_token(self.config.lifecycle.shutdown_timeout());
        let stopped = self.coordinator.stop_all(stop_ctx).await;

        served?;
        stopped?;
        Ok(())
    }
}

/// Reload callback: the command-line overrides win over the reloaded file,
/// then the resulting session limits replace the store's.
fn reload_handler(store: Arc<SessionStore>, overrides: Overrides) -> ReloadCallback {
    Arc::new(move |mut reloaded: RuntimeConfig| {
        overrides.apply(&mut reloaded);
        store.set_limits(SessionLimits::from(&reloaded.session));
    })
}
