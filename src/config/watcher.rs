//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::loader::load_config;
use crate::config::schema::RuntimeConfig;
use crate::lifecycle::{LifecycleError, Supervisor};

/// Receives every successfully reloaded configuration.
pub type ReloadCallback = Arc<dyn Fn(RuntimeConfig) + Send + Sync>;

/// Emits a freshly loaded `RuntimeConfig` whenever the file changes and
/// still validates.
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
    update_tx: mpsc::UnboundedSender<RuntimeConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of its update channel.
    pub fn new(path: &Path, poll_interval: Duration) -> (Self, mpsc::UnboundedReceiver<RuntimeConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                poll_interval,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::debug!(path = %path.display(), kind = ?event.kind, "Config file changed");
                        match load_config(&path) {
                            Ok(reloaded) => {
                                let _ = tx.send(reloaded);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Config reload rejected, previous limits stay in effect");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch failed"),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), poll_secs = self.poll_interval.as_secs(), "Watching config file");
        Ok(watcher)
    }
}

struct Running {
    _watcher: RecommendedWatcher,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Supervisor that watches `path` while running and hands each valid
/// reload to `on_reload`.
pub fn watcher_supervisor(
    path: PathBuf,
    poll_interval: Duration,
    on_reload: ReloadCallback,
) -> Result<Supervisor, LifecycleError> {
    let supervisor = Supervisor::new("config-watcher");
    let running: Arc<Mutex<Option<Running>>> = Arc::new(Mutex::new(None));

    let slot = running.clone();
    supervisor.on_start(move |_ctx| {
        let slot = slot.clone();
        let path = path.clone();
        let on_reload = on_reload.clone();
        async move {
            let (watcher, mut updates) = ConfigWatcher::new(&path, poll_interval);
            let watcher = watcher.run()?;

            let stop = CancellationToken::new();
            let task = tokio::spawn({
                let stop = stop.clone();
                async move {
                    loop {
                        tokio::select! {
                            _ = stop.cancelled() => break,
                            update = updates.recv() => match update {
                                Some(config) => on_reload(config),
                                None => break,
                            },
                        }
                    }
                }
            });

            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Running {
                _watcher: watcher,
                stop,
                task,
            });
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
    })?;

    let slot = running;
    supervisor.on_stop(move |_ctx| {
        let running = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        async move {
            if let Some(running) = running {
                running.stop.cancel();
                if let Err(e) = running.task.await {
                    tracing::warn!(error = %e, "Config reload task ended abnormally");
                }
                tracing::info!("Config watcher stopped");
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
    })?;

    Ok(supervisor)
}
