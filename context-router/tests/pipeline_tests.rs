//! End-to-end tests for the capture pipeline.
//!
//! These drive the session through real backend processes (`sh` scripts)
//! and check the rendered documents.

#![cfg(unix)]

use chrono::{TimeZone, Utc};
use context_router::normalize::MAX_CONTENT_CHARS;
use context_router::protocol::{self, BrowserCapture, ExtensionCaptureResult, MAX_FULL_TEXT_CHARS};
use context_router::types::{Heading, Link};
use context_router::{
    normalize, render, BackendCommand, CaptureRequest, CaptureSession, CaptureStamp,
    CaptureTarget, Config, Dispatcher, ErrorCode, ExtractionInput, ExtractionMethod, Payload,
    RenderMode, TriggerMode, PROTOCOL_VERSION,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn script(body: &str) -> BackendCommand {
    BackendCommand::new("sh").with_args(["-c", body])
}

fn reply_from_file(dir: &Path, name: &str, line: &str) -> BackendCommand {
    let path = dir.join(name);
    std::fs::write(&path, format!("{}\n", line)).unwrap();
    script(&format!("read req; cat '{}'", path.display()))
}

fn safari_target() -> CaptureTarget {
    CaptureTarget {
        bundle_id: "com.apple.Safari".to_string(),
        app_name: "Safari".to_string(),
        window_title: "Release notes".to_string(),
        url: Some("https://example.com/notes".to_string()),
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.timeouts.browser_ms = 400;
    config.timeouts.accessibility_ms = 2_000;
    config.timeouts.ocr_ms = 2_000;
    config
}

fn capture_envelope(full_text: String) -> String {
    protocol::encode(
        "bridge-reply",
        "2026-02-03T04:05:07.000Z",
        Payload::CaptureResult(ExtensionCaptureResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capture: BrowserCapture {
                url: "https://example.com/notes".to_string(),
                title: "Release notes".to_string(),
                full_text,
                headings: vec![Heading {
                    level: 1,
                    text: "Release notes".to_string(),
                }],
                links: vec![Link {
                    text: "Changelog".to_string(),
                    href: "https://example.com/changelog".to_string(),
                }],
                site_name: Some("Example".to_string()),
                ..Default::default()
            },
        }),
    )
    .to_json()
    .unwrap()
}

fn request() -> CaptureRequest {
    CaptureRequest::new(TriggerMode::ManualHotkey, 8_000, false)
}

/// Test a browser bridge win through a real bridge process
#[tokio::test]
async fn test_browser_bridge_capture_renders_document() {
    let dir = tempfile::tempdir().unwrap();
    let text = "Version two ships a faster indexer. Search results now update live.".to_string();

    let mut dispatcher = Dispatcher::new(BTreeMap::new());
    dispatcher.register("safari", reply_from_file(dir.path(), "safari.json", &capture_envelope(text)));

    let session = CaptureSession::from_config(Arc::new(dispatcher), &fast_config());
    let report = session.capture(request(), &safari_target()).await.unwrap();

    assert_eq!(report.resolution.method, ExtractionMethod::BrowserExtension);
    assert_eq!(report.resolution.error_code, None);
    assert!(report.markdown.starts_with("---\n"));
    assert!(report.markdown.contains("source_type: \"webpage\"\n"));
    assert!(report.markdown.contains("origin: \"https://example.com/notes\"\n"));
    assert!(report.markdown.contains("extraction_method: \"browser_extension\"\n"));
    assert!(report.markdown.contains("- [Changelog](https://example.com/changelog)"));
    assert!(report.markdown.ends_with('\n') && !report.markdown.ends_with("\n\n"));
}

/// Test that a long page of repeated sentences stays bounded
#[test]
fn test_repetitive_page_is_summarized_and_chunked() {
    let full_text = "The quarterly report shows steady growth across all regions. ".repeat(300);
    let input = ExtractionInput {
        url: "https://example.com/report".to_string(),
        title: "Quarterly report".to_string(),
        full_text,
        ..Default::default()
    };
    let stamp = CaptureStamp::new("capture-a", Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap());

    let context = normalize(&input, ExtractionMethod::BrowserExtension, &stamp);
    assert!(!context.truncated);
    assert!(!context.summary.is_empty() && context.summary.len() <= 6);
    assert!(context.key_points.len() <= 8);
    assert!(!context.chunks.is_empty());
    for (i, chunk) in context.chunks.iter().enumerate() {
        assert_eq!(chunk.id, format!("chunk-{:03}", i + 1));
        assert!(chunk.token_estimate <= 2_000);
    }
    assert!(context.raw_excerpt.len() <= 4_096);

    let markdown = render(&context, &input, RenderMode::Full);
    assert!(markdown.contains("extraction_method: \"browser_extension\"\n"));
    assert!(markdown.contains("confidence: 0.95\n"));
    assert!(markdown.contains("### chunk-001 (~"));
    assert!(!markdown.contains("> **Warning:**"));
}

/// Test the full fallback walk down to metadata only
#[tokio::test]
async fn test_all_tiers_failing_falls_back_to_metadata() {
    let mut dispatcher = Dispatcher::new(BTreeMap::new());
    // Bridge hangs past its timeout; the live bridge and OCR are not installed
    dispatcher.register("safari", script("exec sleep 30"));
    dispatcher.register(
        "desktop-ax",
        script(&format!(
            "read req; echo '{{\"text\":\"{}\"}}'",
            "short text ".repeat(5).trim_end()
        )),
    );

    let session = CaptureSession::from_config(Arc::new(dispatcher), &fast_config());
    let report = session.capture(request(), &safari_target()).await.unwrap();
    let resolution = &report.resolution;

    assert_eq!(resolution.method, ExtractionMethod::MetadataOnly);
    assert_eq!(resolution.error_code, Some(ErrorCode::ExtensionUnavailable));

    let backends: Vec<&str> = resolution.attempts.iter().map(|a| a.backend.as_str()).collect();
    assert_eq!(backends, vec!["safari", "safari-live", "desktop-ax", "desktop-ocr", "metadata"]);

    let warnings = &report.context.warnings;
    assert!(warnings.iter().any(|w| w.starts_with("safari: ERR_TIMEOUT")));
    assert!(warnings.iter().any(|w| w.starts_with("safari-live: ERR_EXTENSION_UNAVAILABLE")));
    assert!(warnings.iter().any(|w| w.starts_with("desktop-ax: 54 chars extracted")));
    assert!(warnings.iter().any(|w| w.starts_with("desktop-ocr: ERR_EXTENSION_UNAVAILABLE")));

    assert!(report.markdown.contains("extraction_method: \"metadata_only\"\n"));
    assert!(report.markdown.contains("No page or window text could be extracted."));
    assert!(report.markdown.contains("# Release notes\n"));
}

/// Test that rendering is byte-for-byte deterministic
#[test]
fn test_rerender_is_byte_identical() {
    let input = ExtractionInput {
        url: "com.microsoft.VSCode".to_string(),
        title: "main.rs - context-router".to_string(),
        full_text: "# Overview\n\nThe router walks each tier in order.\n\n# Details\n\nTimeouts are per tier and bounded by the request budget.".to_string(),
        headings: vec![
            Heading { level: 1, text: "Overview".to_string() },
            Heading { level: 1, text: "Details".to_string() },
        ],
        warnings: vec!["desktop-ax: slow tree walk".to_string()],
        ..Default::default()
    };
    let stamp = CaptureStamp::new("capture-c", Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap());

    let first = render(
        &normalize(&input, ExtractionMethod::Accessibility, &stamp),
        &input,
        RenderMode::Full,
    );
    let second = render(
        &normalize(&input, ExtractionMethod::Accessibility, &stamp),
        &input,
        RenderMode::Full,
    );
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert!(first.contains("app_bundle_id: \"com.microsoft.VSCode\"\n"));
    assert!(first.contains("captured_at: \"2026-02-03T04:05:06.000Z\"\n"));
}

/// Test that an oversized bridge payload is rejected and the walk moves on
#[tokio::test]
async fn test_oversized_payload_is_rejected() {
    let oversized = capture_envelope("a".repeat(MAX_FULL_TEXT_CHARS + 1));
    let err = protocol::decode(&oversized).unwrap_err();
    assert_eq!(err.code, ErrorCode::PayloadTooLarge);

    let dir = tempfile::tempdir().unwrap();
    let mut dispatcher = Dispatcher::new(BTreeMap::new());
    dispatcher.register("safari", reply_from_file(dir.path(), "large.json", &oversized));
    dispatcher.register(
        "desktop-ax",
        script(&format!(
            "read req; echo '{{\"text\":\"{}\"}}'",
            "Accessible page text with enough words to pass. ".repeat(8).trim_end()
        )),
    );

    let session = CaptureSession::from_config(Arc::new(dispatcher), &fast_config());
    let report = session.capture(request(), &safari_target()).await.unwrap();

    assert_eq!(report.resolution.method, ExtractionMethod::Accessibility);
    assert_eq!(report.resolution.error_code, Some(ErrorCode::ExtensionUnavailable));
    assert!(report
        .context
        .warnings
        .iter()
        .any(|w| w.starts_with("safari: ERR_PAYLOAD_TOO_LARGE")));
}

/// Test that oversized content from a desktop backend is truncated, not rejected
#[test]
fn test_desktop_content_truncated_at_limit() {
    let input = ExtractionInput {
        url: "com.apple.TextEdit".to_string(),
        title: "huge.txt".to_string(),
        full_text: "word ".repeat(MAX_CONTENT_CHARS / 5 + 10),
        ..Default::default()
    };
    let stamp = CaptureStamp::new("capture-t", Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap());

    let context = normalize(&input, ExtractionMethod::Accessibility, &stamp);
    assert!(context.truncated);
    assert!(context
        .warnings
        .contains(&format!("Content truncated to {} characters", MAX_CONTENT_CHARS)));

    let markdown = render(&context, &input, RenderMode::Brief);
    assert!(markdown.contains("truncated: true\n"));
    assert!(markdown.contains("> **Warning:** content was truncated to 200000 characters."));
    assert!(!markdown.contains("## Content Chunks"));
}

/// Test that a browser capture of an internal page still renders as a webpage
#[test]
fn test_browser_internal_page_renders_as_webpage() {
    let input = ExtractionInput {
        url: "chrome://settings".to_string(),
        title: "Settings".to_string(),
        full_text: "You and Google. Autofill and passwords. Privacy and security.".to_string(),
        ..Default::default()
    };
    let stamp = CaptureStamp::new("capture-s", Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap());

    let markdown = render(
        &normalize(&input, ExtractionMethod::BrowserExtension, &stamp),
        &input,
        RenderMode::Full,
    );
    assert!(markdown.contains("source_type: \"webpage\"\n"));
    assert!(markdown.contains("origin: \"chrome://settings\"\n"));
    assert!(!markdown.contains("app_bundle_id:"));
}
