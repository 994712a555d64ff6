//! Core types used throughout the context router.
//!
//! This module defines the capture trigger, the backend-agnostic extraction
//! payload, the resolver's outcome and the canonical error taxonomy shared by
//! every layer of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest timeout a caller may request for a single capture.
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Maximum number of links kept on an [`ExtractionInput`].
pub const MAX_LINKS: usize = 200;

/// Canonical error codes shared with every backend.
///
/// The string forms are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "ERR_PROTOCOL_VERSION")]
    ProtocolVersion,
    #[serde(rename = "ERR_PAYLOAD_INVALID")]
    PayloadInvalid,
    #[serde(rename = "ERR_PAYLOAD_TOO_LARGE")]
    PayloadTooLarge,
    #[serde(rename = "ERR_TIMEOUT")]
    Timeout,
    #[serde(rename = "ERR_EXTENSION_UNAVAILABLE")]
    ExtensionUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ProtocolVersion => "ERR_PROTOCOL_VERSION",
            ErrorCode::PayloadInvalid => "ERR_PAYLOAD_INVALID",
            ErrorCode::PayloadTooLarge => "ERR_PAYLOAD_TOO_LARGE",
            ErrorCode::Timeout => "ERR_TIMEOUT",
            ErrorCode::ExtensionUnavailable => "ERR_EXTENSION_UNAVAILABLE",
        }
    }

    /// Parse a wire code. Unknown codes yield `None`.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "ERR_PROTOCOL_VERSION" => Some(ErrorCode::ProtocolVersion),
            "ERR_PAYLOAD_INVALID" => Some(ErrorCode::PayloadInvalid),
            "ERR_PAYLOAD_TOO_LARGE" => Some(ErrorCode::PayloadTooLarge),
            "ERR_TIMEOUT" => Some(ErrorCode::Timeout),
            "ERR_EXTENSION_UNAVAILABLE" => Some(ErrorCode::ExtensionUnavailable),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fallback tier that produced the capture's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Browser extension bridge or live browser extraction
    BrowserExtension,
    /// OS accessibility tree of the focused window
    Accessibility,
    /// Text recognition over a window screenshot
    Ocr,
    /// Synthesized from already-known title/url/app identity
    MetadataOnly,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::BrowserExtension => "browser_extension",
            ExtractionMethod::Accessibility => "accessibility",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::MetadataOnly => "metadata_only",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a capture describes a web page or a desktop application window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Webpage,
    DesktopApp,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Webpage => "webpage",
            SourceType::DesktopApp => "desktop_app",
        }
    }
}

/// How the user started the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    ManualHotkey,
    ManualMenu,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::ManualHotkey => "manual_hotkey",
            TriggerMode::ManualMenu => "manual_menu",
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-initiated capture. Created once per user action and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub request_id: String,
    pub mode: TriggerMode,
    pub timeout_ms: u64,
    pub requested_at: DateTime<Utc>,
    pub include_selection_text: bool,
}

impl CaptureRequest {
    /// Create a request with a fresh id stamped at the current time
    pub fn new(mode: TriggerMode, timeout_ms: u64, include_selection_text: bool) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            mode,
            timeout_ms,
            requested_at: Utc::now(),
            include_selection_text,
        }
    }

    /// Reject malformed triggers before any backend is touched
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.request_id.trim().is_empty() {
            return Err(CaptureError::InvalidTrigger(
                "request id must not be empty".to_string(),
            ));
        }
        if self.timeout_ms == 0 || self.timeout_ms > MAX_REQUEST_TIMEOUT_MS {
            return Err(CaptureError::InvalidTrigger(format!(
                "timeout must be between 1 and {} ms, got {}",
                MAX_REQUEST_TIMEOUT_MS, self.timeout_ms
            )));
        }
        Ok(())
    }
}

/// The foreground application detected by the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureTarget {
    /// Application bundle ID (macOS) or executable name
    pub bundle_id: String,
    /// Application display name
    pub app_name: String,
    /// Focused window title
    #[serde(default)]
    pub window_title: String,
    /// Current URL when the foreground app is a browser
    #[serde(default)]
    pub url: Option<String>,
}

/// A structural heading reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// Heading level, 1 through 6
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub href: String,
}

/// Optional descriptive metadata attached to an extraction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_text: Option<String>,
    /// Application display name (desktop captures)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Application bundle ID (desktop captures)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
}

/// Backend-agnostic raw capture, produced by exactly one backend per attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionInput {
    /// URL for web content, bundle ID or other origin identifier otherwise
    pub url: String,
    pub title: String,
    pub full_text: String,
    #[serde(default)]
    pub headings: Vec<Heading>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub metadata: InputMetadata,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Backend-reported confidence (0.0-1.0, mainly for OCR)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ExtractionInput {
    /// Number of non-whitespace-trimmed characters, used for tier thresholds
    pub fn text_len(&self) -> usize {
        self.full_text.trim().chars().count()
    }
}

/// Deduplicate links by target and cap them at [`MAX_LINKS`], keeping first occurrences
pub fn dedupe_links(links: &[Link]) -> Vec<Link> {
    let mut seen = std::collections::BTreeSet::new();
    let mut result = Vec::new();
    for link in links {
        let href = link.href.trim();
        if href.is_empty() || !seen.insert(href.to_string()) {
            continue;
        }
        result.push(Link {
            text: link.text.trim().to_string(),
            href: href.to_string(),
        });
        if result.len() == MAX_LINKS {
            break;
        }
    }
    result
}

/// Outcome of one backend invocation during resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AttemptOutcome {
    /// Backend returned text meeting its threshold
    Accepted { chars: usize },
    /// Backend returned text but not enough of it
    BelowThreshold { chars: usize, minimum: usize },
    /// Backend failed with a canonical error code
    Failed { code: ErrorCode, message: String },
    /// Tier skipped because the request budget ran out
    Skipped { reason: String },
}

/// One entry of the resolver's attempt log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendAttempt {
    pub backend: String,
    pub method: ExtractionMethod,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// The resolver's output. Created fresh per capture and consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResolution {
    pub method: ExtractionMethod,
    pub input: ExtractionInput,
    /// Most recent canonical failure seen while walking the chain
    pub error_code: Option<ErrorCode>,
    pub warnings: Vec<String>,
    pub attempts: Vec<BackendAttempt>,
}

/// Errors surfaced by the capture pipeline to its caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Invalid capture trigger: {0}")]
    InvalidTrigger(String),

    #[error("A capture is already in flight")]
    Busy,

    #[error("Capture cancelled")]
    Cancelled,
}
