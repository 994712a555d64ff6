//! Metadata-only fallback.
//!
//! When no backend produced usable text, the capture is built from what the
//! presentation layer already knows about the window, plus a short excerpt of
//! why extraction failed. This never fails.

use super::{non_empty, origin_for};
use crate::types::{CaptureTarget, ExtractionInput, InputMetadata};

/// Diagnostics quoted in the synthesized text
const MAX_DIAGNOSTIC_LINES: usize = 3;

/// Characters kept per diagnostic line
const MAX_DIAGNOSTIC_CHARS: usize = 160;

pub fn synthesize(target: &CaptureTarget, diagnostics: &[String]) -> ExtractionInput {
    let title = non_empty(&target.window_title)
        .or_else(|| non_empty(&target.app_name))
        .unwrap_or_else(|| "Untitled".to_string());

    let mut lines = vec![title.clone()];
    match (non_empty(&target.app_name), non_empty(&target.bundle_id)) {
        (Some(name), Some(bundle)) => lines.push(format!("Application: {} ({})", name, bundle)),
        (Some(name), None) => lines.push(format!("Application: {}", name)),
        (None, Some(bundle)) => lines.push(format!("Application: {}", bundle)),
        (None, None) => {}
    }
    if let Some(url) = target.url.as_deref().and_then(non_empty) {
        lines.push(format!("URL: {}", url));
    }

    lines.push(String::new());
    lines.push("No page or window text could be extracted.".to_string());
    for diagnostic in diagnostics.iter().take(MAX_DIAGNOSTIC_LINES) {
        lines.push(format!("- {}", excerpt(diagnostic)));
    }

    ExtractionInput {
        url: origin_for(target),
        title,
        full_text: lines.join("\n"),
        metadata: InputMetadata {
            app_name: non_empty(&target.app_name),
            bundle_id: non_empty(&target.bundle_id),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn excerpt(line: &str) -> String {
    let line = line.trim();
    if line.chars().count() <= MAX_DIAGNOSTIC_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesize_from_identity() {
        let target = CaptureTarget {
            bundle_id: "com.example.Viewer".to_string(),
            app_name: "Viewer".to_string(),
            window_title: "Quarterly report".to_string(),
            url: None,
        };
        let diagnostics = vec![
            "desktop-ax: 50 chars, below the 240 char threshold".to_string(),
            "desktop-ocr: ERR_EXTENSION_UNAVAILABLE".to_string(),
        ];

        let input = synthesize(&target, &diagnostics);
        assert_eq!(input.title, "Quarterly report");
        assert_eq!(input.url, "com.example.Viewer");
        assert!(input.full_text.contains("Application: Viewer (com.example.Viewer)"));
        assert!(input.full_text.contains("- desktop-ocr: ERR_EXTENSION_UNAVAILABLE"));
    }

    #[test]
    fn test_synthesize_with_nothing_known() {
        let input = synthesize(&CaptureTarget::default(), &[]);
        assert_eq!(input.title, "Untitled");
        assert!(!input.full_text.is_empty());
    }

    #[test]
    fn test_long_diagnostics_are_cut() {
        let long = "x".repeat(1_000);
        let input = synthesize(&CaptureTarget::default(), &[long.clone(), long.clone(), long.clone(), long]);
        let quoted = input.full_text.lines().filter(|l| l.starts_with("- ")).count();
        assert_eq!(quoted, MAX_DIAGNOSTIC_LINES);
        assert!(input.full_text.len() < 1_000);
    }
}
