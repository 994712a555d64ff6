//! Context Router - Main entry point
//!
//! Reads the foreground target as JSON on stdin, checks backend health, runs
//! one capture and writes the markdown document to stdout. Logs go to stderr.

use context_router::{
    diagnostics, CaptureRequest, CaptureSession, CaptureTarget, Config, Dispatcher, Transport,
    TriggerMode,
};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting context router");
    debug!("Configuration path: {:?}", Config::default_config_path());

    if !config.general.enabled {
        info!("Capturing is disabled in configuration, exiting");
        return Ok(());
    }

    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;
    let target: CaptureTarget = if raw.trim().is_empty() {
        CaptureTarget::default()
    } else {
        serde_json::from_str(&raw)?
    };
    info!("Capturing {} ({})", target.app_name, target.bundle_id);

    let transport: Arc<dyn Transport> = Arc::new(Dispatcher::new(config.backend_commands()));

    for report in diagnostics::ping_all(transport.clone(), config.timeouts.ping()).await {
        if report.ready {
            debug!("Backend {} ready in {}ms", report.backend, report.latency_ms);
        } else {
            warn!(
                "Backend {} not ready: {}",
                report.backend,
                report.message.as_deref().unwrap_or("no details")
            );
        }
    }

    let session = Arc::new(CaptureSession::from_config(transport, &config));
    let plan = session.resolver().plan(&target);
    let chain: Vec<&str> = plan.iter().map(|kind| kind.backend_id()).collect();
    debug!("Fallback chain: {}", chain.join(" -> "));

    let interrupted = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling capture");
            interrupted.cancel();
        }
    });

    let request = CaptureRequest::new(
        TriggerMode::ManualHotkey,
        config.general.capture_timeout_ms,
        config.general.include_selection_text,
    );
    let report = session.capture(request, &target).await?;

    for attempt in &report.resolution.attempts {
        debug!(
            "Attempt {} ({}) took {}ms: {:?}",
            attempt.backend, attempt.method, attempt.elapsed_ms, attempt.outcome
        );
    }

    print!("{}", report.markdown);
    Ok(())
}
