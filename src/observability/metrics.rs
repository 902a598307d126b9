//! Metrics collection and exposition.
//!
//! # Metrics
//! - `runtime_sessions_active` / `runtime_sessions_total` (gauge)
//! - `runtime_sessions_created_total` (counter)
//! - `runtime_sessions_expired_total` / `runtime_sessions_evicted_total` (counter)
//! - `runtime_lifecycle_transitions_total` (counter): by subsystem, state
//! - `runtime_subsystem_up` (gauge): 1=running, 0=anything else
//! - `runtime_rpc_requests_total` (counter): by method, outcome
//! - `runtime_rpc_request_duration_seconds` (histogram)
//! - `runtime_rate_limited_total` (counter)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed
//! - The Prometheus exporter is itself a managed subsystem

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::lifecycle::{LifecycleError, LifecycleState, Supervisor};

pub fn record_sessions(active: usize, total: usize) {
    metrics::gauge!("runtime_sessions_active").set(active as f64);
    metrics::gauge!("runtime_sessions_total").set(total as f64);
}

pub fn record_session_created() {
    metrics::counter!("runtime_sessions_created_total").increment(1);
}

pub fn record_sessions_expired(count: usize) {
    metrics::counter!("runtime_sessions_expired_total").increment(count as u64);
}

pub fn record_session_evicted() {
    metrics::counter!("runtime_sessions_evicted_total").increment(1);
}

pub fn record_lifecycle_transition(subsystem: &str, state: LifecycleState) {
    metrics::counter!(
        "runtime_lifecycle_transitions_total",
        "subsystem" => subsystem.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
}

pub fn record_subsystem_up(subsystem: &str, up: bool) {
    metrics::gauge!("runtime_subsystem_up", "subsystem" => subsystem.to_string())
        .set(if up { 1.0 } else { 0.0 });
}

pub fn record_rpc_request(method: &str, outcome: &'static str, start: Instant) {
    metrics::counter!(
        "runtime_rpc_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("runtime_rpc_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(reason: &'static str) {
    metrics::counter!("runtime_rate_limited_total", "reason" => reason).increment(1);
}

/// Supervisor that installs the Prometheus scrape endpoint on start.
///
/// The exporter is process-global; stopping the supervisor leaves the
/// endpoint in place.
pub fn exporter_supervisor(addr: SocketAddr) -> Result<Supervisor, LifecycleError> {
    let supervisor = Supervisor::new("metrics-exporter");
    supervisor.on_start(move |_ctx| async move {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(address = %addr, "Metrics endpoint listening");
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    })?;
    supervisor.on_stop(|_ctx| async {
        tracing::debug!("Metrics exporter left installed until process exit");
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    })?;
    Ok(supervisor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn exporter_serves_recorded_metrics() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let exporter = exporter_supervisor(addr).unwrap();
        exporter.initialize().unwrap();
        exporter.start(CancellationToken::new()).await.unwrap();

        record_session_created();
        record_subsystem_up("exporter-check", true);

        let mut body = String::new();
        for _ in 0..50 {
            if let Ok(res) = reqwest::get(format!("http://{addr}/metrics")).await {
                body = res.text().await.unwrap();
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(body.contains("runtime_sessions_created_total"));
        assert!(body.contains("runtime_subsystem_up{subsystem=\"exporter-check\"} 1"));

        exporter.stop(CancellationToken::new()).await.unwrap();
        assert_eq!(exporter.state(), LifecycleState::Stopped);
    }
}
