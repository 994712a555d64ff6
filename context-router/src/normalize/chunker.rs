//! Content chunker - splits normalized text into token-bounded chunks
//!
//! Chunks follow paragraph and heading boundaries. Paragraphs are packed
//! greedily up to the target size, a heading starts a new chunk once the
//! current one is big enough, and paragraphs that are too large on their own
//! are split at sentences and finally by characters.

use super::summarize::split_sentences;
use super::text::{estimate_tokens, is_markdown_heading};
use serde::Serialize;
use std::collections::HashSet;

/// Characters per estimated token
const CHARS_PER_TOKEN: usize = 4;

/// Chunk configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// A heading closes the current chunk once it reaches this many tokens
    pub min_tokens: usize,
    /// Greedy packing stops before exceeding this
    pub max_tokens: usize,
    /// No chunk ever exceeds this
    pub hard_cap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: 1_200,
            max_tokens: 1_800,
            hard_cap_tokens: 2_000,
        }
    }
}

/// A single chunk of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentChunk {
    /// `chunk-001`, `chunk-002`, ... in document order
    pub id: String,
    pub token_estimate: usize,
    pub text: String,
}

/// A paragraph or heading-led block
struct Block {
    text: String,
    starts_with_heading: bool,
}

/// Chunk being assembled
#[derive(Default)]
struct Pending {
    parts: Vec<String>,
    chars: usize,
}

impl Pending {
    /// Estimated tokens if `extra` chars were appended with a separator
    fn tokens_with(&self, extra: usize) -> usize {
        let separator = if self.parts.is_empty() { 0 } else { 2 };
        (self.chars + separator + extra + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
    }

    fn tokens(&self) -> usize {
        (self.chars + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
    }

    fn push(&mut self, part: String) {
        if !self.parts.is_empty() {
            self.chars += 2;
        }
        self.chars += part.chars().count();
        self.parts.push(part);
    }

    fn take(&mut self) -> Option<String> {
        if self.parts.is_empty() {
            return None;
        }
        self.chars = 0;
        Some(std::mem::take(&mut self.parts).join("\n\n"))
    }
}

/// Chunker splits content into heading/paragraph aligned chunks
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkerConfig::default())
    }

    /// Split cleaned text into chunks. `headings` are extra heading texts to
    /// treat as block starts besides markdown headings.
    pub fn chunk(&self, content: &str, headings: &[String]) -> Vec<ContentChunk> {
        if content.trim().is_empty() {
            return vec![];
        }

        let mut texts = Vec::new();
        let mut pending = Pending::default();

        for block in blocks(content, headings) {
            for (i, piece) in self.fit_block(&block.text).into_iter().enumerate() {
                let heading_start = i == 0 && block.starts_with_heading;
                let piece_chars = piece.chars().count();

                if heading_start && pending.tokens() >= self.config.min_tokens {
                    texts.extend(pending.take());
                }
                if pending.tokens_with(piece_chars) > self.config.max_tokens {
                    texts.extend(pending.take());
                }
                pending.push(piece);
            }
        }
        texts.extend(pending.take());

        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| ContentChunk {
                id: format!("chunk-{:03}", i + 1),
                token_estimate: estimate_tokens(&text),
                text,
            })
            .collect()
    }

    /// Split a block that is too large on its own
    fn fit_block(&self, block: &str) -> Vec<String> {
        if estimate_tokens(block) <= self.config.max_tokens {
            return vec![block.to_string()];
        }

        let max_chars = self.config.max_tokens.min(self.config.hard_cap_tokens) * CHARS_PER_TOKEN;
        let mut pieces = Vec::new();
        let mut current = String::new();

        // Sentences from different lines stay on separate lines
        let sentences = block.lines().flat_map(|line| {
            split_sentences(line)
                .into_iter()
                .enumerate()
                .map(|(i, sentence)| (if i == 0 { '\n' } else { ' ' }, sentence))
        });

        for (separator, sentence) in sentences {
            let sentence_chars = sentence.chars().count();
            if sentence_chars > max_chars {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                pieces.extend(hard_split(sentence, max_chars));
                continue;
            }

            let joined = current.chars().count() + usize::from(!current.is_empty()) + sentence_chars;
            if joined > max_chars && !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(separator);
            }
            current.push_str(sentence);
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}

/// Break text into pieces of at most `max_chars` characters
fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Split text into blocks at blank lines and before heading lines
fn blocks(content: &str, headings: &[String]) -> Vec<Block> {
    let known: HashSet<String> = headings
        .iter()
        .map(|h| h.trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .collect();

    let mut blocks = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    let mut starts_with_heading = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            flush_block(&mut blocks, &mut lines, starts_with_heading);
            starts_with_heading = false;
            continue;
        }
        if is_markdown_heading(line) || known.contains(&line.to_lowercase()) {
            flush_block(&mut blocks, &mut lines, starts_with_heading);
            starts_with_heading = true;
        }
        lines.push(line);
    }
    flush_block(&mut blocks, &mut lines, starts_with_heading);

    blocks
}

fn flush_block(blocks: &mut Vec<Block>, lines: &mut Vec<&str>, starts_with_heading: bool) {
    if !lines.is_empty() {
        blocks.push(Block {
            text: lines.join("\n"),
            starts_with_heading,
        });
        lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn paragraph(words: usize, seed: usize) -> String {
        (0..words)
            .map(|i| format!("word{}x{}", seed, i % 10))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_content_has_no_chunks() {
        let chunker = Chunker::with_defaults();
        assert!(chunker.chunk("", &[]).is_empty());
        assert!(chunker.chunk("  \n ", &[]).is_empty());
    }

    #[test]
    fn test_small_content_single_chunk() {
        let chunker = Chunker::with_defaults();
        let chunks = chunker.chunk("# Title\n\nHello world this is a test", &[]);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "chunk-001");
        assert_eq!(chunks[0].text, "# Title\n\nHello world this is a test");
    }

    #[test]
    fn test_paragraphs_packed_under_max() {
        let chunker = Chunker::with_defaults();
        // Each paragraph is roughly 500 tokens
        let content: Vec<String> = (0..10).map(|i| paragraph(250, i)).collect();
        let chunks = chunker.chunk(&content.join("\n\n"), &[]);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_estimate <= 1_800);
        }
        let rejoined: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rejoined.join("\n\n"), content.join("\n\n"));
    }

    #[test]
    fn test_heading_flushes_large_chunk() {
        let chunker = Chunker::with_defaults();
        // ~1300 tokens, then a heading
        let content = format!("{}\n\n## Next section\n{}", paragraph(650, 1), paragraph(20, 2));
        let chunks = chunker.chunk(&content, &[]);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("## Next section"));
    }

    #[test]
    fn test_heading_does_not_flush_small_chunk() {
        let chunker = Chunker::with_defaults();
        let content = "Intro paragraph.\n\nSetup\nRun the installer.";
        let chunks = chunker.chunk(content, &["Setup".to_string()]);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_oversized_block_split_by_sentence_then_chars() {
        let chunker = Chunker::with_defaults();
        let sentences = (0..600)
            .map(|i| format!("Sentence {} has a few words in it.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let unbroken = "x".repeat(20_000);
        let chunks = chunker.chunk(&format!("{}\n\n{}", sentences, unbroken), &[]);

        for chunk in &chunks {
            assert!(chunk.token_estimate <= 2_000, "chunk {} too large", chunk.id);
        }
        let total: usize = chunks.iter().map(|c| c.text.matches('x').count()).sum();
        assert!(total >= 20_000);
    }

    #[test]
    fn test_oversized_block_keeps_line_breaks() {
        let chunker = Chunker::with_defaults();
        let lines: Vec<String> = (0..120)
            .map(|i| format!("Line {} explains one more step of the deployment process in plain words.", i))
            .collect();
        let content = format!("## Deployment\n{}", lines.join("\n"));
        let chunks = chunker.chunk(&content, &[]);

        assert!(chunks.len() > 1);
        let first: Vec<&str> = chunks[0].text.lines().collect();
        assert_eq!(first[0], "## Deployment");
        assert_eq!(first[1], lines[0]);
        for chunk in &chunks {
            assert!(chunk.token_estimate <= 1_800);
            for line in chunk.text.lines().filter(|l| !l.starts_with("##")) {
                assert!(lines.iter().any(|l| l == line), "mangled line: {}", line);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_chunk_ids_sequential(paragraphs in prop::collection::vec(1usize..900, 1..20)) {
            let content = paragraphs
                .iter()
                .enumerate()
                .map(|(i, words)| paragraph(*words, i))
                .collect::<Vec<_>>()
                .join("\n\n");
            let chunks = Chunker::with_defaults().chunk(&content, &[]);

            prop_assert!(!chunks.is_empty());
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(&chunk.id, &format!("chunk-{:03}", i + 1));
                prop_assert!(chunk.token_estimate <= 2_000);
            }
        }
    }
}
