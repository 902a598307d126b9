//! Shutdown coordination for the runtime.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Process-wide shutdown trigger.
///
/// Every long-running task receives a child of the root token; triggering
/// cancels all of them at once.
#[derive(Debug, Clone)]
pub struct Shutdown {
    root: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    /// Token cancelled when shutdown is triggered.
    pub fn token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        if !self.root.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.root.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Wait until shutdown is triggered.
    pub async fn triggered(&self) {
        self.root.cancelled().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A fresh token that cancels itself after `timeout`.
///
/// Used as the stop context so a hung stop hook cannot block exit forever.
pub fn deadline_token(timeout: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let guard = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        guard.cancel();
    });
    token
}
