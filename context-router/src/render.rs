//! Markdown renderer.
//!
//! Produces the paste-ready document: a YAML frontmatter block in a fixed field
//! order followed by five fixed body sections. Rendering is pure; the same
//! context always renders to the same bytes.

use crate::normalize::{NormalizedContext, MAX_CONTENT_CHARS};
use crate::types::{ExtractionInput, SourceType};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// How much of the context to render
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Every section
    #[default]
    Full,
    /// Without Content Chunks and Raw Excerpt
    Brief,
}

pub const SECTION_SUMMARY: &str = "## Summary";
pub const SECTION_KEY_POINTS: &str = "## Key Points";
pub const SECTION_CHUNKS: &str = "## Content Chunks";
pub const SECTION_RAW_EXCERPT: &str = "## Raw Excerpt";
pub const SECTION_LINKS: &str = "## Links & Metadata";

const EMPTY_SECTION: &str = "_None._";

pub fn render(context: &NormalizedContext, input: &ExtractionInput, mode: RenderMode) -> String {
    let mut out = String::new();
    write_frontmatter(&mut out, context);

    out.push('\n');
    out.push_str(&format!("# {}\n\n", inline(&context.title)));
    if context.truncated {
        out.push_str(&format!(
            "> **Warning:** content was truncated to {} characters.\n\n",
            MAX_CONTENT_CHARS
        ));
    }

    out.push_str(SECTION_SUMMARY);
    out.push_str("\n\n");
    write_bullets(&mut out, &context.summary);

    out.push_str(SECTION_KEY_POINTS);
    out.push_str("\n\n");
    write_bullets(&mut out, &context.key_points);

    if mode == RenderMode::Full {
        out.push_str(SECTION_CHUNKS);
        out.push_str("\n\n");
        if context.chunks.is_empty() {
            out.push_str(EMPTY_SECTION);
            out.push_str("\n\n");
        }
        for chunk in &context.chunks {
            let _ = writeln!(out, "### {} (~{} tokens)\n", chunk.id, chunk.token_estimate);
            out.push_str(&escape_block(&chunk.text));
            out.push_str("\n\n");
        }

        out.push_str(SECTION_RAW_EXCERPT);
        out.push_str("\n\n");
        if context.raw_excerpt.is_empty() {
            out.push_str(EMPTY_SECTION);
            out.push_str("\n\n");
        } else {
            let fence = fence_for(&context.raw_excerpt);
            let _ = writeln!(out, "{}text\n{}\n{}\n", fence, context.raw_excerpt, fence);
        }
    }

    out.push_str(SECTION_LINKS);
    out.push_str("\n\n");
    write_links_and_metadata(&mut out, context, input);

    // Exactly one trailing newline
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out.push('\n');
    out
}

fn write_frontmatter(out: &mut String, context: &NormalizedContext) {
    out.push_str("---\n");
    let _ = writeln!(out, "id: {}", yaml_quote(&context.id));
    let _ = writeln!(out, "captured_at: {}", yaml_quote(&context.captured_at));
    let _ = writeln!(out, "source_type: {}", yaml_quote(context.source_type.as_str()));
    match (context.source_type, &context.app_bundle_id) {
        (SourceType::DesktopApp, Some(bundle_id)) => {
            let _ = writeln!(out, "app_bundle_id: {}", yaml_quote(bundle_id));
        }
        (SourceType::DesktopApp, None) => {
            let _ = writeln!(out, "app_bundle_id: {}", yaml_quote(&context.origin));
        }
        (SourceType::Webpage, _) => {
            let _ = writeln!(out, "origin: {}", yaml_quote(&context.origin));
        }
    }
    let _ = writeln!(out, "title: {}", yaml_quote(&context.title));
    let _ = writeln!(out, "app_or_site: {}", yaml_quote(&context.app_or_site));
    let _ = writeln!(
        out,
        "extraction_method: {}",
        yaml_quote(context.extraction_method.as_str())
    );
    let _ = writeln!(out, "confidence: {:.2}", context.confidence);
    let _ = writeln!(out, "truncated: {}", context.truncated);
    let _ = writeln!(out, "token_estimate: {}", context.token_estimate);
    if context.warnings.is_empty() {
        out.push_str("warnings: []\n");
    } else {
        out.push_str("warnings:\n");
        for warning in &context.warnings {
            let _ = writeln!(out, "  - {}", yaml_quote(warning));
        }
    }
    out.push_str("---\n");
}

fn write_bullets(out: &mut String, items: &[String]) {
    if items.is_empty() {
        out.push_str(EMPTY_SECTION);
        out.push('\n');
    }
    for item in items {
        let _ = writeln!(out, "- {}", inline(item));
    }
    out.push('\n');
}

fn write_links_and_metadata(out: &mut String, context: &NormalizedContext, input: &ExtractionInput) {
    out.push_str("### Links\n\n");
    if context.links.is_empty() {
        out.push_str(EMPTY_SECTION);
        out.push('\n');
    }
    for link in &context.links {
        let text = if link.text.trim().is_empty() { &link.href } else { &link.text };
        let _ = writeln!(out, "- [{}]({})", escape_link_text(&inline(text)), escape_href(&link.href));
    }

    if !input.headings.is_empty() {
        out.push_str("\n### Outline\n\n");
        for heading in &input.headings {
            let indent = "  ".repeat(usize::from(heading.level.clamp(1, 6)) - 1);
            let _ = writeln!(out, "{}- {}", indent, inline(&heading.text));
        }
    }

    out.push_str("\n### Metadata\n\n");
    for (key, value) in &context.metadata {
        let _ = writeln!(out, "- {}: {}", key, inline(value));
    }
}

/// Double-quoted YAML scalar that no input can break out of
pub fn yaml_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            // Line and paragraph separators would be folded as breaks
            c if c.is_control() || matches!(c, '\u{2028}' | '\u{2029}' | '\u{FEFF}') => {
                let _ = write!(quoted, "\\u{:04X}", c as u32);
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Single-line text for bullets and headings
fn inline(value: &str) -> String {
    let joined = value.split_whitespace().collect::<Vec<_>>().join(" ");
    escape_line(&joined)
}

/// Keep content from being read as a markdown heading
fn escape_line(line: &str) -> String {
    if line.starts_with('#') {
        format!("\\{}", line)
    } else {
        line.to_string()
    }
}

fn escape_block(text: &str) -> String {
    text.lines().map(escape_line).collect::<Vec<_>>().join("\n")
}

fn escape_link_text(text: &str) -> String {
    text.replace('[', "\\[").replace(']', "\\]")
}

fn escape_href(href: &str) -> String {
    href.replace(' ', "%20").replace('(', "%28").replace(')', "%29")
}

/// Backtick fence longer than any backtick run in `text`
fn fence_for(text: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in text.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}
