//! Capture resolution across the extraction fallback chain.
//!
//! The resolver walks browser bridges, accessibility, OCR and finally the
//! metadata-only synthesis, in that order, one backend at a time. Each tier is
//! bounded by its own timeout and by what is left of the request budget. A
//! tier's failure is recorded as a warning and the walk moves on; only
//! cancellation stops it early.

use crate::config::Config;
use crate::dispatcher::{DispatchError, Transport};
use crate::extractors::{BackendKind, BackendRegistry, InvokeContext};
use crate::profiles::{AppProfile, ProfileTable};
use crate::types::{
    AttemptOutcome, BackendAttempt, CaptureError, CaptureRequest, CaptureResolution,
    CaptureTarget, ErrorCode, ExtractionInput, ExtractionMethod,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A tier with less than this left of the request budget is skipped
const MIN_TIER_BUDGET: Duration = Duration::from_millis(10);

/// Timeouts and thresholds used while walking the chain
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    pub browser_timeout: Duration,
    pub accessibility_timeout: Duration,
    pub ocr_timeout: Duration,
    pub browser_min_chars: usize,
    /// Browser bridge ids to try first
    pub browser_priority: Vec<String>,
}

impl ResolverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            browser_timeout: config.timeouts.browser(),
            accessibility_timeout: config.timeouts.accessibility(),
            ocr_timeout: config.timeouts.ocr(),
            browser_min_chars: config.thresholds.browser_min_chars,
            browser_priority: config.browser.priority.clone(),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Running state of one resolution
#[derive(Default)]
struct Walk {
    warnings: Vec<String>,
    attempts: Vec<BackendAttempt>,
    error_code: Option<ErrorCode>,
}

impl Walk {
    fn record(&mut self, kind: &BackendKind, elapsed: Duration, outcome: AttemptOutcome) {
        self.attempts.push(BackendAttempt {
            backend: kind.backend_id().to_string(),
            method: kind.method(),
            elapsed_ms: elapsed.as_millis() as u64,
            outcome,
        });
    }
}

pub struct CaptureResolver {
    transport: Arc<dyn Transport>,
    registry: BackendRegistry,
    profiles: ProfileTable,
    settings: ResolverSettings,
}

impl CaptureResolver {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: BackendRegistry,
        profiles: ProfileTable,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            transport,
            registry,
            profiles,
            settings,
        }
    }

    /// Build a resolver with everything taken from configuration
    pub fn from_config(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let mut registry = BackendRegistry::new();
        for bundle_id in &config.browser.extra_chromium_apps {
            registry.add_chromium_browser(bundle_id);
        }
        for bundle_id in &config.browser.extra_safari_apps {
            registry.add_safari_app(bundle_id);
        }

        Self::new(
            transport,
            registry,
            ProfileTable::from_config(&config.thresholds),
            ResolverSettings::from_config(config),
        )
    }

    /// The ordered chain that would be walked for a target
    pub fn plan(&self, target: &CaptureTarget) -> Vec<BackendKind> {
        self.registry.chain(target, &self.settings.browser_priority)
    }

    /// Resolve one capture. Only an invalid trigger or cancellation is an error.
    pub async fn resolve(
        &self,
        request: &CaptureRequest,
        target: &CaptureTarget,
        cancel: &CancellationToken,
    ) -> Result<CaptureResolution, CaptureError> {
        request.validate()?;

        let deadline = Instant::now() + Duration::from_millis(request.timeout_ms);
        let profile = self.profiles.lookup(&target.bundle_id, &target.app_name);
        let chain = self.plan(target);
        let mut walk = Walk::default();

        debug!(
            "Resolving capture {} for {} ({}) across {} backends",
            request.request_id,
            target.app_name,
            target.bundle_id,
            chain.len()
        );

        for kind in chain.iter().filter(|kind| **kind != BackendKind::MetadataOnly) {
            if cancel.is_cancelled() {
                return Err(CaptureError::Cancelled);
            }

            let backend = kind.backend_id();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining < MIN_TIER_BUDGET {
                let reason = format!(
                    "{}: skipped, the {}ms capture budget is exhausted",
                    backend, request.timeout_ms
                );
                warn!("{}", reason);
                walk.warnings.push(reason.clone());
                walk.record(kind, Duration::ZERO, AttemptOutcome::Skipped { reason });
                continue;
            }

            let timeout = self.tier_timeout(kind).min(remaining);
            let ctx = InvokeContext {
                request,
                target,
                profile,
                timeout,
                cancel,
                diagnostics: &walk.warnings,
            };

            let started = Instant::now();
            let result = kind.invoke(self.transport.as_ref(), &ctx).await;
            let elapsed = started.elapsed();

            match result {
                Err(DispatchError::Cancelled) => {
                    info!("Capture {} cancelled during {}", request.request_id, backend);
                    return Err(CaptureError::Cancelled);
                }
                Err(DispatchError::Failed { code, message }) => {
                    info!("{} failed with {}", backend, code);
                    walk.warnings.push(format!("{}: {} ({})", backend, code, message));
                    walk.error_code = Some(code);
                    walk.record(kind, elapsed, AttemptOutcome::Failed { code, message });
                }
                Ok(input) => {
                    let chars = input.text_len();
                    let minimum = self.minimum_chars(kind, &profile);
                    if chars >= minimum {
                        info!(
                            "Capture {} resolved via {} ({} chars in {}ms)",
                            request.request_id,
                            backend,
                            chars,
                            elapsed.as_millis()
                        );
                        walk.record(kind, elapsed, AttemptOutcome::Accepted { chars });
                        return Ok(finish(kind.method(), input, request, walk));
                    }

                    info!("{} returned {} chars, below its threshold of {}", backend, chars, minimum);
                    walk.warnings.push(format!(
                        "{}: {} chars extracted, below the {} char {} threshold",
                        backend,
                        chars,
                        minimum,
                        kind.method()
                    ));
                    walk.record(kind, elapsed, AttemptOutcome::BelowThreshold { chars, minimum });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }

        warn!(
            "No backend produced usable text for {} ({}), falling back to metadata only",
            target.app_name, target.bundle_id
        );
        let input = self.metadata_only(request, target, profile, cancel, &walk.warnings).await;
        let chars = input.text_len();
        walk.record(&BackendKind::MetadataOnly, Duration::ZERO, AttemptOutcome::Accepted { chars });
        Ok(finish(ExtractionMethod::MetadataOnly, input, request, walk))
    }

    async fn metadata_only(
        &self,
        request: &CaptureRequest,
        target: &CaptureTarget,
        profile: AppProfile,
        cancel: &CancellationToken,
        diagnostics: &[String],
    ) -> ExtractionInput {
        let ctx = InvokeContext {
            request,
            target,
            profile,
            timeout: Duration::ZERO,
            cancel,
            diagnostics,
        };
        match BackendKind::MetadataOnly.invoke(self.transport.as_ref(), &ctx).await {
            Ok(input) => input,
            Err(_) => crate::extractors::metadata::synthesize(target, diagnostics),
        }
    }

    fn tier_timeout(&self, kind: &BackendKind) -> Duration {
        match kind {
            BackendKind::Browser(_) => self.settings.browser_timeout,
            BackendKind::Accessibility => self.settings.accessibility_timeout,
            BackendKind::Ocr => self.settings.ocr_timeout,
            BackendKind::MetadataOnly => Duration::ZERO,
        }
    }

    fn minimum_chars(&self, kind: &BackendKind, profile: &AppProfile) -> usize {
        match kind {
            BackendKind::Browser(_) => self.settings.browser_min_chars,
            BackendKind::Accessibility => profile.minimum_chars,
            BackendKind::Ocr => 1,
            BackendKind::MetadataOnly => 0,
        }
    }
}

/// Attach the walk's warnings to the winning input and apply request policy
fn finish(
    method: ExtractionMethod,
    mut input: ExtractionInput,
    request: &CaptureRequest,
    walk: Walk,
) -> CaptureResolution {
    if !request.include_selection_text {
        input.metadata.selection_text = None;
    }

    let mut warnings = walk.warnings.clone();
    warnings.append(&mut input.warnings);
    input.warnings = warnings;

    CaptureResolution {
        method,
        input,
        error_code: walk.error_code,
        warnings: walk.warnings,
        attempts: walk.attempts,
    }
}
