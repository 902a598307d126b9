//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mcp_runtime::lifecycle::{HookError, Supervisor};
use mcp_runtime::transport::{HandlerTarget, TransportBinding, TransportError};

/// Ordered record of lifecycle hook calls across subsystems.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events whose text starts with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

/// A supervisor that logs "start:<name>" and "stop:<name>", optionally
/// failing its start hook.
pub fn recording_supervisor(name: &str, log: &EventLog, fail_start: bool) -> Supervisor {
    let supervisor = Supervisor::new(name);

    let (n, l) = (name.to_string(), log.clone());
    supervisor
        .on_start(move |_ctx| {
            l.push(format!("start:{n}"));
            let outcome = if fail_start {
                Err(HookError::from(format!("{n} refused to start")))
            } else {
                Ok(())
            };
            async move { outcome }
        })
        .unwrap();

    let (n, l) = (name.to_string(), log.clone());
    supervisor
        .on_stop(move |_ctx| {
            l.push(format!("stop:{n}"));
            async { Ok::<(), HookError>(()) }
        })
        .unwrap();

    supervisor
}

/// Transport binding that records each serve call and waits for cancellation.
#[derive(Clone)]
pub struct RecordingBinding {
    tag: String,
    log: EventLog,
}

impl RecordingBinding {
    pub fn new(tag: &str, log: &EventLog) -> Self {
        Self {
            tag: tag.to_string(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl TransportBinding for RecordingBinding {
    async fn serve(&self, ctx: CancellationToken, target: HandlerTarget) -> Result<(), TransportError> {
        self.log.push(format!("serve:{}", self.tag));
        let request = r#"{"jsonrpc":"2.0","id":1,"method":"session/stats"}"#;
        if target.handle(request).await.is_some() {
            self.log.push(format!("handled:{}", self.tag));
        }
        ctx.cancelled().await;
        Ok(())
    }
}

/// Wait until `log` has an event starting with `prefix`.
pub async fn wait_for(log: &EventLog, prefix: &str) {
    while log.matching(prefix).is_empty() {
        tokio::task::yield_now().await;
    }
}
