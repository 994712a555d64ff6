//! Normalization engine.
//!
//! Turns one backend-agnostic capture into a [`NormalizedContext`]: cleaned and
//! bounded text, an extractive summary, key points, chunks and a confidence
//! score. Everything here is a pure function of its inputs, so the same
//! capture always normalizes to the same context.

pub mod chunker;
pub mod summarize;
pub mod text;

use crate::types::{dedupe_links, ExtractionInput, ExtractionMethod, Link, SourceType};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub use chunker::{Chunker, ChunkerConfig, ContentChunk};
pub use summarize::Summary;

/// Character budget for captured text
pub const MAX_CONTENT_CHARS: usize = 200_000;

/// Byte budget of the raw excerpt
pub const RAW_EXCERPT_BYTES: usize = 4_096;

/// Reported OCR confidence below this adds a warning
pub const OCR_CONFIDENCE_FLOOR: f64 = 0.55;

/// Assumed OCR confidence when the backend reports none
const DEFAULT_OCR_CONFIDENCE: f64 = 0.6;

/// Identity of one capture, assigned by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStamp {
    pub id: String,
    pub captured_at: DateTime<Utc>,
}

impl CaptureStamp {
    pub fn new(id: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedContext {
    pub id: String,
    pub captured_at: String,
    pub source_type: SourceType,
    pub title: String,
    pub origin: String,
    pub app_or_site: String,
    /// Set for desktop captures
    pub app_bundle_id: Option<String>,
    pub extraction_method: ExtractionMethod,
    /// 0.0-1.0, rounded to two decimals
    pub confidence: f64,
    pub truncated: bool,
    pub token_estimate: usize,
    pub metadata: BTreeMap<String, String>,
    pub links: Vec<Link>,
    pub warnings: Vec<String>,
    pub summary: Vec<String>,
    pub key_points: Vec<String>,
    pub chunks: Vec<ContentChunk>,
    pub raw_excerpt: String,
}

pub fn normalize(
    input: &ExtractionInput,
    method: ExtractionMethod,
    stamp: &CaptureStamp,
) -> NormalizedContext {
    let (kept, truncated) = text::truncate_chars(&input.full_text, MAX_CONTENT_CHARS);
    let cleaned = text::clean(kept);

    let mut warnings: Vec<String> = Vec::new();
    for warning in &input.warnings {
        let warning = warning.trim();
        if !warning.is_empty() && !warnings.iter().any(|w| w == warning) {
            warnings.push(warning.to_string());
        }
    }
    if truncated {
        warnings.push(truncation_warning());
    }

    let (confidence, confidence_warning) = confidence_for(method, input.confidence);
    warnings.extend(confidence_warning);

    let headings: Vec<String> = input.headings.iter().map(|h| h.text.clone()).collect();
    let Summary { summary, key_points } = summarize::summarize(&cleaned, &headings);
    let chunks = Chunker::with_defaults().chunk(&cleaned, &headings);
    let links = dedupe_links(&input.links);

    let origin = input.url.trim().to_string();
    let source_type = source_type_of(method, &origin);
    let app_bundle_id = match source_type {
        SourceType::Webpage => None,
        SourceType::DesktopApp => input
            .metadata
            .bundle_id
            .clone()
            .or_else(|| Some(origin.clone()).filter(|o| !o.is_empty())),
    };
    let app_or_site = app_or_site(input, source_type, &origin);

    let title = Some(input.title.trim())
        .filter(|t| !t.is_empty())
        .or_else(|| Some(app_or_site.as_str()).filter(|a| !a.is_empty()))
        .unwrap_or("Untitled")
        .to_string();

    let metadata = metadata_map(input, &cleaned, links.len());

    NormalizedContext {
        id: stamp.id.clone(),
        captured_at: stamp.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        source_type,
        title,
        origin,
        app_or_site,
        app_bundle_id,
        extraction_method: method,
        confidence,
        truncated,
        token_estimate: text::estimate_tokens(&cleaned),
        metadata,
        links,
        warnings,
        summary,
        key_points,
        chunks,
        raw_excerpt: text::excerpt_bytes(&cleaned, RAW_EXCERPT_BYTES).to_string(),
    }
}

pub fn truncation_warning() -> String {
    format!("Content truncated to {} characters", MAX_CONTENT_CHARS)
}

/// Confidence for a method, plus a warning when OCR reported a low score
pub fn confidence_for(method: ExtractionMethod, reported: Option<f64>) -> (f64, Option<String>) {
    let (value, warning) = match method {
        ExtractionMethod::BrowserExtension => (0.95, None),
        ExtractionMethod::Accessibility => (0.85, None),
        ExtractionMethod::MetadataOnly => (0.2, None),
        ExtractionMethod::Ocr => {
            let score = reported
                .filter(|r| r.is_finite())
                .map(|r| r.clamp(0.0, 1.0))
                .unwrap_or(DEFAULT_OCR_CONFIDENCE);
            let warning = reported
                .filter(|_| score < OCR_CONFIDENCE_FLOOR)
                .map(|_| format!("Low OCR confidence ({:.2})", score));
            (0.9 * score, warning)
        }
    };
    ((value * 100.0_f64).round() / 100.0, warning)
}

/// Browser captures are always `webpage`. Desktop tiers count as `webpage`
/// only when their origin is an http(s) or file URL.
pub fn source_type_of(method: ExtractionMethod, origin: &str) -> SourceType {
    if method == ExtractionMethod::BrowserExtension {
        return SourceType::Webpage;
    }
    match url::Url::parse(origin) {
        Ok(url) if matches!(url.scheme(), "http" | "https" | "file") => SourceType::Webpage,
        _ => SourceType::DesktopApp,
    }
}

fn app_or_site(input: &ExtractionInput, source_type: SourceType, origin: &str) -> String {
    let named = match source_type {
        SourceType::Webpage => input.metadata.site_name.clone().or_else(|| {
            url::Url::parse(origin)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        }),
        SourceType::DesktopApp => input
            .metadata
            .app_name
            .clone()
            .or_else(|| input.metadata.bundle_id.clone()),
    };

    named
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| origin.to_string())
}

fn metadata_map(input: &ExtractionInput, cleaned: &str, link_count: usize) -> BTreeMap<String, String> {
    let meta = &input.metadata;
    let fields = [
        ("description", &meta.description),
        ("site_name", &meta.site_name),
        ("language", &meta.language),
        ("author", &meta.author),
        ("published_time", &meta.published_time),
        ("selection_text", &meta.selection_text),
        ("app_name", &meta.app_name),
        ("bundle_id", &meta.bundle_id),
    ];

    let mut map: BTreeMap<String, String> = fields
        .iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v.to_string()))
        })
        .collect();

    map.insert("content_sha256".to_string(), text::content_sha256(cleaned));
    map.insert("heading_count".to_string(), input.headings.len().to_string());
    map.insert("link_count".to_string(), link_count.to_string());
    map
}
