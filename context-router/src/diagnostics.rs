//! Backend health checks.
//!
//! Pings run in parallel, each bounded by its own timeout, so one hung backend
//! never delays the report for the others.

use crate::dispatcher::{ping_backend, PingReport, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Ping every backend the transport knows about
pub async fn ping_all(transport: Arc<dyn Transport>, timeout: Duration) -> Vec<PingReport> {
    let backends = transport.backends();
    ping_backends(transport, &backends, timeout).await
}

/// Ping the given backends in parallel. Results are sorted by backend id.
pub async fn ping_backends(
    transport: Arc<dyn Transport>,
    backends: &[String],
    timeout: Duration,
) -> Vec<PingReport> {
    let mut tasks = JoinSet::new();
    for backend in backends {
        let transport = transport.clone();
        let backend = backend.clone();
        tasks.spawn(async move { ping_backend(transport.as_ref(), &backend, timeout).await });
    }

    let mut reports = Vec::with_capacity(backends.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => {
                debug!(
                    "Ping {}: ready={} in {}ms",
                    report.backend, report.ready, report.latency_ms
                );
                reports.push(report);
            }
            Err(e) => warn!("Ping task failed: {}", e),
        }
    }

    reports.sort_by(|a, b| a.backend.cmp(&b.backend));

    let ready = reports.iter().filter(|r| r.ready).count();
    info!("Diagnostics: {}/{} backends ready", ready, reports.len());
    reports
}
