//! Extractive summary and key points.
//!
//! Sentences are scored by term frequency against the whole document and by
//! proximity to the closest preceding heading. Selection is greedy, with a
//! novelty bonus against what was already picked; ties go to the earlier
//! sentence. Output is always in document order.

use super::text::{content_terms, is_markdown_heading, tokenize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub const SUMMARY_LINES: usize = 6;
pub const MAX_KEY_POINTS: usize = 8;

/// Sentences shorter than this are never selected
pub const MIN_SENTENCE_WORDS: usize = 4;

/// Key points must overlap every selected sentence less than this
pub const DISTINCT_OVERLAP: f64 = 0.5;

const HEADING_WEIGHT: f64 = 0.5;
const NOVELTY_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub summary: Vec<String>,
    pub key_points: Vec<String>,
}

/// A line-level unit of the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Heading(String),
    Sentence(String),
}

struct Candidate {
    index: usize,
    text: String,
    terms: BTreeSet<String>,
    base_score: f64,
}

/// Split cleaned text into headings and sentences.
///
/// A line is a heading when it is a markdown heading or equals one of the
/// supplied heading texts. Other lines are split after `.`, `!` or `?`
/// followed by whitespace.
pub fn segment(text: &str, headings: &[String]) -> Vec<Segment> {
    let known: HashSet<String> = headings
        .iter()
        .map(|h| h.trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .collect();

    let mut segments = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_markdown_heading(line) || known.contains(&line.to_lowercase()) {
            segments.push(Segment::Heading(line.trim_start_matches('#').trim().to_string()));
            continue;
        }
        segments.extend(split_sentences(line).into_iter().map(|s| Segment::Sentence(s.to_string())));
    }
    segments
}

/// Split one line at sentence terminators followed by whitespace
pub fn split_sentences(line: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = line.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_index, next)) = chars.peek() {
            if next.is_whitespace() {
                let sentence = line[start..i + c.len_utf8()].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = next_index;
            }
        }
    }

    let rest = line[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Token overlap relative to the smaller set
pub fn overlap_ratio(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}

pub fn summarize(text: &str, headings: &[String]) -> Summary {
    let candidates = candidates(&segment(text, headings));
    if candidates.is_empty() {
        return Summary::default();
    }

    let mut selected: Vec<usize> = Vec::new();
    let mut summary = Vec::new();
    while summary.len() < SUMMARY_LINES {
        match pick_next(&candidates, &selected, None) {
            Some(pos) => {
                selected.push(pos);
                summary.push(pos);
            }
            None => break,
        }
    }

    let mut key_points = Vec::new();
    while key_points.len() < MAX_KEY_POINTS {
        match pick_next(&candidates, &selected, Some(DISTINCT_OVERLAP)) {
            Some(pos) => {
                selected.push(pos);
                key_points.push(pos);
            }
            None => break,
        }
    }

    Summary {
        summary: in_document_order(&candidates, summary),
        key_points: in_document_order(&candidates, key_points),
    }
}

fn candidates(segments: &[Segment]) -> Vec<Candidate> {
    let mut frequencies: BTreeMap<String, usize> = BTreeMap::new();
    for segment in segments {
        if let Segment::Sentence(sentence) = segment {
            for term in content_terms(sentence) {
                *frequencies.entry(term).or_insert(0) += 1;
            }
        }
    }
    let max_frequency = frequencies.values().copied().max().unwrap_or(1) as f64;

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut since_heading: Option<usize> = None;
    let mut index = 0;

    for segment in segments {
        let sentence = match segment {
            Segment::Heading(_) => {
                since_heading = Some(0);
                continue;
            }
            Segment::Sentence(sentence) => sentence,
        };

        let proximity = since_heading
            .map(|d| HEADING_WEIGHT / (1.0 + d as f64))
            .unwrap_or(0.0);
        since_heading = since_heading.map(|d| d + 1);
        index += 1;

        if tokenize(sentence).len() < MIN_SENTENCE_WORDS || !seen.insert(sentence.as_str()) {
            continue;
        }

        let terms = content_terms(sentence);
        let term_score = if terms.is_empty() {
            0.0
        } else {
            terms
                .iter()
                .map(|t| frequencies.get(t).copied().unwrap_or(0) as f64 / max_frequency)
                .sum::<f64>()
                / terms.len() as f64
        };

        candidates.push(Candidate {
            index,
            text: sentence.clone(),
            terms: terms.into_iter().collect(),
            base_score: term_score + proximity,
        });
    }
    candidates
}

/// Highest scoring unselected candidate, earliest on ties.
///
/// With `max_overlap` set, candidates overlapping any selected sentence at or
/// above it are not eligible.
fn pick_next(candidates: &[Candidate], selected: &[usize], max_overlap: Option<f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;

    for (pos, candidate) in candidates.iter().enumerate() {
        if selected.contains(&pos) {
            continue;
        }
        let overlap = selected
            .iter()
            .map(|&s| overlap_ratio(&candidate.terms, &candidates[s].terms))
            .fold(0.0, f64::max);
        if max_overlap.is_some_and(|limit| overlap >= limit) {
            continue;
        }

        let score = candidate.base_score + NOVELTY_WEIGHT * (1.0 - overlap);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((pos, score));
        }
    }
    best.map(|(pos, _)| pos)
}

fn in_document_order(candidates: &[Candidate], mut picked: Vec<usize>) -> Vec<String> {
    picked.sort_by_key(|&pos| candidates[pos].index);
    picked.into_iter().map(|pos| candidates[pos].text.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("First one. Second one! Third? v1.2 stays whole... end"),
            vec!["First one.", "Second one!", "Third?", "v1.2 stays whole...", "end"]
        );
    }

    #[test]
    fn test_segment_detects_headings() {
        let text = "# Intro\nThe opening sentence is here. Another follows.\nSetup\nInstall it.";
        let segments = segment(text, &["Setup".to_string()]);
        assert_eq!(segments[0], Segment::Heading("Intro".to_string()));
        assert_eq!(segments[3], Segment::Heading("Setup".to_string()));
        assert_eq!(segments.len(), 5);
    }

    #[test]
    fn test_overlap_ratio() {
        assert_eq!(overlap_ratio(&set(&["a", "b"]), &set(&["b", "c", "d"])), 0.5);
        assert_eq!(overlap_ratio(&set(&[]), &set(&["a"])), 0.0);
        assert_eq!(overlap_ratio(&set(&["a"]), &set(&["a", "b"])), 1.0);
    }

    #[test]
    fn test_summary_cap_and_document_order() {
        let text: String = (0..40)
            .map(|i| format!("Sentence number {} discusses topic {} in detail.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ");
        let result = summarize(&text, &[]);

        assert!(result.summary.len() <= SUMMARY_LINES);
        assert!(!result.summary.is_empty());
        assert!(result.key_points.len() <= MAX_KEY_POINTS);

        let position = |s: &String| text.find(s.as_str()).unwrap();
        let positions: Vec<usize> = result.summary.iter().map(position).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);

        for point in &result.key_points {
            assert!(!result.summary.contains(point));
        }
    }

    #[test]
    fn test_short_and_duplicate_sentences_skipped() {
        let text = "Too short. Way too short. The cache layer stores rendered pages. The cache layer stores rendered pages.";
        let result = summarize(text, &[]);
        assert_eq!(result.summary, vec!["The cache layer stores rendered pages.".to_string()]);
        assert!(result.key_points.is_empty());
    }

    #[test]
    fn test_repeated_text_yields_no_key_points() {
        let text = "Identical sentence with four words.\n".repeat(300);
        let result = summarize(&text, &[]);
        assert_eq!(result.summary.len(), 1);
        assert!(result.key_points.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let text = "Rust compiles to native code. Cargo manages crates and builds. \
                    The borrow checker enforces ownership rules. Traits describe shared behaviour.";
        assert_eq!(summarize(text, &[]), summarize(text, &[]));
    }
}
