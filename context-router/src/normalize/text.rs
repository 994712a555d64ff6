//! Text primitives shared by the normalization stages.

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

lazy_static! {
    // Horizontal whitespace only; line breaks are handled separately
    static ref HORIZONTAL_WHITESPACE: Regex = Regex::new(r"[^\S\n]+").unwrap();

    static ref EXCESS_BREAKS: Regex = Regex::new(r"\n{3,}").unwrap();

    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();

    // ATX heading: 1-6 hashes followed by a space
    static ref MARKDOWN_HEADING: Regex = Regex::new(r"^#{1,6}\s+\S").unwrap();

    static ref STOPWORDS: HashSet<&'static str> = [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "was", "one", "our", "out", "has", "have", "his", "how", "its", "may", "new", "now",
        "old", "see", "two", "who", "did", "get", "him", "let", "say", "she", "too", "use",
        "that", "this", "with", "from", "they", "will", "would", "there", "their", "what",
        "about", "which", "when", "make", "like", "time", "just", "know", "take", "into",
        "year", "your", "some", "could", "them", "than", "then", "look", "only", "come",
        "over", "also", "back", "after", "work", "first", "well", "even", "want", "because",
        "these", "give", "most", "were", "been", "being", "more", "very", "such", "here",
        "where", "while", "each", "other", "those", "through", "should", "does", "doing",
    ]
    .into_iter()
    .collect();
}

/// Cut `text` to at most `max_chars` characters.
///
/// Returns the kept prefix and whether anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&text[..byte_index], true),
        None => (text, false),
    }
}

/// Normalize line endings and whitespace.
///
/// CR and CRLF become LF, horizontal whitespace runs become one space, lines
/// are trimmed, adjacent duplicate lines are dropped and runs of blank lines
/// collapse to one.
pub fn clean(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = HORIZONTAL_WHITESPACE.replace_all(&unified, " ");

    let mut lines: Vec<&str> = Vec::new();
    let mut previous: Option<&str> = None;
    for line in collapsed.split('\n') {
        let line = line.trim();
        if !line.is_empty() && previous == Some(line) {
            continue;
        }
        previous = if line.is_empty() { None } else { Some(line) };
        lines.push(line);
    }

    let joined = lines.join("\n");
    EXCESS_BREAKS.replace_all(&joined, "\n\n").trim().to_string()
}

/// Fixed token heuristic: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a character
pub fn excerpt_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Lowercased word tokens
pub fn tokenize(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Tokens that carry meaning: at least three characters and not a stopword
pub fn content_terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(t.as_str()))
        .collect()
}

pub fn is_markdown_heading(line: &str) -> bool {
    MARKDOWN_HEADING.is_match(line)
}

/// Hex SHA-256 of the text
pub fn content_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_normalizes_whitespace() {
        let raw = "  Title\r\n\r\n\r\n\r\nFirst\t\tline   here \rFirst\t\tline   here\n\n\n\nEnd  ";
        assert_eq!(clean(raw), "Title\n\nFirst line here\n\nEnd");
    }

    #[test]
    fn test_clean_keeps_non_adjacent_duplicates() {
        assert_eq!(clean("a\nb\na"), "a\nb\na");
        assert_eq!(clean("a\n\na"), "a\n\na");
    }

    #[test]
    fn test_truncate_chars_boundary() {
        assert_eq!(truncate_chars("héllo", 5), ("héllo", false));
        assert_eq!(truncate_chars("héllo", 4), ("héll", true));
        assert_eq!(truncate_chars("", 0), ("", false));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "ab\u{00e9}cd";
        assert_eq!(excerpt_bytes(text, 3), "ab");
        assert_eq!(excerpt_bytes(text, 4), "ab\u{00e9}");
        assert_eq!(excerpt_bytes(text, 100), text);
    }

    #[test]
    fn test_content_terms_drop_stopwords() {
        let terms = content_terms("The Rust compiler and the borrow checker, it is strict!");
        assert_eq!(terms, vec!["rust", "compiler", "borrow", "checker", "strict"]);
    }

    #[test]
    fn test_markdown_heading() {
        assert!(is_markdown_heading("## Setup"));
        assert!(!is_markdown_heading("#hashtag"));
        assert!(!is_markdown_heading("####### too deep"));
    }

    #[test]
    fn test_content_sha256() {
        assert_eq!(
            content_sha256("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
