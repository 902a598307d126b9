//! OS signal handling.
//!
//! SIGTERM and SIGINT (Ctrl+C) both trigger graceful shutdown. A second
//! signal while shutdown is in progress exits immediately.

use crate::lifecycle::shutdown::Shutdown;

/// Wait for the first termination signal.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}

/// Spawn a task that triggers `shutdown` on the first signal and forces exit
/// on the second. Shutdown started elsewhere counts as the first.
pub fn spawn_signal_listener(shutdown: Shutdown) {
    tokio::spawn(async move {
        tokio::select! {
            _ = termination_signal() => shutdown.trigger(),
            _ = shutdown.triggered() => {}
        }

        termination_signal().await;
        tracing::warn!("Second termination signal received, forcing exit");
        std::process::exit(130);
    });
}
