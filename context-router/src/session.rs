//! Capture session: the end-to-end pipeline with at most one capture in flight.
//!
//! The session owns the resolver, a single-slot in-flight guard holding the
//! running capture's cancellation token, and the last finished report.

use crate::config::Config;
use crate::dispatcher::Transport;
use crate::normalize::{normalize, CaptureStamp, NormalizedContext};
use crate::render::{render, RenderMode};
use crate::resolver::CaptureResolver;
use crate::types::{CaptureError, CaptureRequest, CaptureResolution, CaptureTarget};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything produced by one capture
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub resolution: CaptureResolution,
    pub context: NormalizedContext,
    pub markdown: String,
}

pub struct CaptureSession {
    resolver: CaptureResolver,
    mode: RenderMode,
    in_flight: Mutex<Option<CancellationToken>>,
    last: RwLock<Option<Arc<CaptureReport>>>,
}

/// Clears the in-flight slot when the capture ends, however it ends
struct InFlight<'a> {
    session: &'a CaptureSession,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.session.slot() = None;
    }
}

impl CaptureSession {
    pub fn new(resolver: CaptureResolver, mode: RenderMode) -> Self {
        Self {
            resolver,
            mode,
            in_flight: Mutex::new(None),
            last: RwLock::new(None),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self::new(
            CaptureResolver::from_config(transport, config),
            config.output.mode,
        )
    }

    pub fn resolver(&self) -> &CaptureResolver {
        &self.resolver
    }

    /// Run one capture end to end.
    ///
    /// Fails with [`CaptureError::Busy`] while another capture is running.
    pub async fn capture(
        &self,
        request: CaptureRequest,
        target: &CaptureTarget,
    ) -> Result<Arc<CaptureReport>, CaptureError> {
        request.validate()?;

        let cancel = CancellationToken::new();
        {
            let mut slot = self.slot();
            if slot.is_some() {
                warn!("Rejecting capture {}: another capture is in flight", request.request_id);
                return Err(CaptureError::Busy);
            }
            *slot = Some(cancel.clone());
        }
        let _in_flight = InFlight { session: self };

        let resolution = self.resolver.resolve(&request, target, &cancel).await?;

        let stamp = CaptureStamp::new(request.request_id.clone(), Utc::now());
        let context = normalize(&resolution.input, resolution.method, &stamp);
        let markdown = render(&context, &resolution.input, self.mode);

        info!(
            "Capture {} ({}) complete: {} via {}, {} warnings",
            request.request_id,
            request.mode,
            context.title,
            context.extraction_method,
            context.warnings.len()
        );

        let report = Arc::new(CaptureReport {
            resolution,
            context,
            markdown,
        });
        *self.last.write().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
        Ok(report)
    }

    /// Cancel the running capture, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) => {
                info!("Cancelling in-flight capture");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot().is_some()
    }

    /// Most recent finished capture
    pub fn last_report(&self) -> Option<Arc<CaptureReport>> {
        self.last.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}
