//! Extraction backends for the capture fallback chain.
//!
//! The chain is built from a closed set of variants:
//! - Browser: an extension bridge or live AppleScript bridge, spoken to with
//!   versioned envelopes
//! - Accessibility: the focused window's accessibility tree
//! - OCR: text recognition over a window screenshot
//! - MetadataOnly: synthesized locally, never fails

pub mod accessibility;
pub mod browser;
pub mod metadata;
pub mod ocr;

use crate::dispatcher::{backend_ids, DispatchError, Transport};
use crate::profiles::AppProfile;
use crate::types::{CaptureRequest, CaptureTarget, ErrorCode, ExtractionInput, ExtractionMethod, InputMetadata};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Browser families with their own set of bridges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserFamily {
    Safari,
    Chromium,
}

impl BrowserFamily {
    /// Bridges in default priority order: extension bridge before live bridge
    pub fn default_bridges(&self) -> &'static [&'static str] {
        match self {
            BrowserFamily::Safari => &[backend_ids::SAFARI, backend_ids::SAFARI_LIVE],
            BrowserFamily::Chromium => &[backend_ids::CHROME, backend_ids::CHROME_LIVE],
        }
    }
}

/// One step of the fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Browser bridge addressed by backend id
    Browser(String),
    Accessibility,
    Ocr,
    MetadataOnly,
}

impl BackendKind {
    pub fn method(&self) -> ExtractionMethod {
        match self {
            BackendKind::Browser(_) => ExtractionMethod::BrowserExtension,
            BackendKind::Accessibility => ExtractionMethod::Accessibility,
            BackendKind::Ocr => ExtractionMethod::Ocr,
            BackendKind::MetadataOnly => ExtractionMethod::MetadataOnly,
        }
    }

    /// Backend id used in logs and the attempt list
    pub fn backend_id(&self) -> &str {
        match self {
            BackendKind::Browser(id) => id,
            BackendKind::Accessibility => backend_ids::DESKTOP_AX,
            BackendKind::Ocr => backend_ids::DESKTOP_OCR,
            BackendKind::MetadataOnly => "metadata",
        }
    }

    /// Run this backend once with the given budget
    pub async fn invoke<T: Transport + ?Sized>(
        &self,
        transport: &T,
        ctx: &InvokeContext<'_>,
    ) -> Result<ExtractionInput, DispatchError> {
        match self {
            BackendKind::Browser(id) => browser::capture(transport, id, ctx).await,
            BackendKind::Accessibility => accessibility::capture(transport, ctx).await,
            BackendKind::Ocr => ocr::capture(transport, ctx).await,
            BackendKind::MetadataOnly => Ok(metadata::synthesize(ctx.target, ctx.diagnostics)),
        }
    }
}

/// Everything a backend needs for one invocation
pub struct InvokeContext<'a> {
    pub request: &'a CaptureRequest,
    pub target: &'a CaptureTarget,
    pub profile: AppProfile,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
    /// Failures seen so far, quoted by the metadata-only synthesis
    pub diagnostics: &'a [String],
}

/// Registry of browsers and the bridges that can read them
pub struct BackendRegistry {
    safari_apps: HashSet<String>,
    chromium_browsers: HashSet<String>,
    /// Lowercased display names, for targets without a usable bundle ID
    browser_names: HashMap<String, BrowserFamily>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        let mut safari_apps = HashSet::new();
        let mut chromium_browsers = HashSet::new();
        let mut browser_names = HashMap::new();

        safari_apps.insert("com.apple.Safari".to_string());
        safari_apps.insert("com.apple.SafariTechnologyPreview".to_string());

        // Chromium-based browsers
        chromium_browsers.insert("com.google.Chrome".to_string());
        chromium_browsers.insert("com.google.Chrome.canary".to_string());
        chromium_browsers.insert("com.brave.Browser".to_string());
        chromium_browsers.insert("com.microsoft.edgemac".to_string());
        chromium_browsers.insert("com.vivaldi.Vivaldi".to_string());
        chromium_browsers.insert("com.operasoftware.Opera".to_string());
        chromium_browsers.insert("company.thebrowser.Browser".to_string());

        for name in ["safari", "safari technology preview"] {
            browser_names.insert(name.to_string(), BrowserFamily::Safari);
        }
        for name in [
            "google chrome",
            "google chrome canary",
            "brave browser",
            "microsoft edge",
            "vivaldi",
            "opera",
            "arc",
        ] {
            browser_names.insert(name.to_string(), BrowserFamily::Chromium);
        }

        Self {
            safari_apps,
            chromium_browsers,
            browser_names,
        }
    }

    /// Browser family of the foreground app, if it is a known browser
    pub fn browser_family(&self, target: &CaptureTarget) -> Option<BrowserFamily> {
        if self.safari_apps.contains(&target.bundle_id) {
            return Some(BrowserFamily::Safari);
        }
        if self.chromium_browsers.contains(&target.bundle_id) {
            return Some(BrowserFamily::Chromium);
        }
        self.browser_names
            .get(&target.app_name.trim().to_lowercase())
            .copied()
    }

    /// Build the ordered fallback chain for a target.
    ///
    /// Browser bridges named in `priority` come first in the listed order, then
    /// the family's remaining bridges in default order. Unrecognized apps get
    /// no browser tier.
    pub fn chain(&self, target: &CaptureTarget, priority: &[String]) -> Vec<BackendKind> {
        let mut chain = Vec::new();

        if let Some(family) = self.browser_family(target) {
            let bridges = family.default_bridges();
            let preferred = priority
                .iter()
                .map(String::as_str)
                .filter(|id| bridges.iter().any(|bridge| bridge == id));

            for id in preferred.chain(bridges.iter().copied()) {
                let kind = BackendKind::Browser(id.to_string());
                if !chain.contains(&kind) {
                    chain.push(kind);
                }
            }
        }

        chain.push(BackendKind::Accessibility);
        chain.push(BackendKind::Ocr);
        chain.push(BackendKind::MetadataOnly);
        chain
    }

    /// Add a custom app to the Chromium browser list
    pub fn add_chromium_browser(&mut self, bundle_id: &str) {
        self.chromium_browsers.insert(bundle_id.to_string());
    }

    /// Add a custom app to the Safari list
    pub fn add_safari_app(&mut self, bundle_id: &str) {
        self.safari_apps.insert(bundle_id.to_string());
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply of a desktop (accessibility or OCR) backend
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DesktopReply {
    pub text: String,
    pub title: Option<String>,
    pub confidence: Option<f64>,
    pub warnings: Vec<String>,
}

/// Build the single-line request for a desktop backend
pub(crate) fn desktop_request(command: &str, ctx: &InvokeContext<'_>, with_profile: bool) -> String {
    let mut request = serde_json::json!({
        "command": command,
        "bundleId": ctx.target.bundle_id,
        "appName": ctx.target.app_name,
        "timeoutMs": ctx.timeout.as_millis() as u64,
    });
    if with_profile {
        request["attributeProfile"] = Value::from(ctx.profile.attribute_profile.as_str());
    }
    request.to_string()
}

/// Interpret a desktop backend's JSON reply
pub(crate) fn parse_desktop_reply(backend: &str, value: &Value) -> Result<DesktopReply, DispatchError> {
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let code = value
            .get("code")
            .and_then(Value::as_str)
            .and_then(ErrorCode::parse)
            .unwrap_or(ErrorCode::ExtensionUnavailable);
        return Err(DispatchError::failed(
            code,
            format!("backend '{}' reported: {}", backend, error),
        ));
    }

    let text = value.get("text").and_then(Value::as_str).ok_or_else(|| {
        DispatchError::failed(
            ErrorCode::PayloadInvalid,
            format!("backend '{}' reply has no text field", backend),
        )
    })?;

    let title = value
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let warnings = value
        .get("warnings")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(DesktopReply {
        text: text.to_string(),
        title,
        confidence: value.get("confidence").and_then(Value::as_f64),
        warnings,
    })
}

impl DesktopReply {
    /// Convert into the backend-agnostic capture for a target window
    pub(crate) fn into_input(self, target: &CaptureTarget, confidence: Option<f64>) -> ExtractionInput {
        let title = self
            .title
            .or_else(|| non_empty(&target.window_title))
            .or_else(|| non_empty(&target.app_name))
            .unwrap_or_default();

        ExtractionInput {
            url: origin_for(target),
            title,
            full_text: self.text,
            metadata: InputMetadata {
                app_name: non_empty(&target.app_name),
                bundle_id: non_empty(&target.bundle_id),
                ..Default::default()
            },
            warnings: self.warnings,
            confidence,
            ..Default::default()
        }
    }
}

/// URL when known, otherwise the bundle ID
pub(crate) fn origin_for(target: &CaptureTarget) -> String {
    target
        .url
        .as_deref()
        .and_then(non_empty)
        .unwrap_or_else(|| target.bundle_id.clone())
}

pub(crate) fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
