//! Splits crawled page text into chunks for embedding and search.
//! Sizes are counted in chars. Prefers ending right before a code fence, then
//! paragraph breaks, sentence ends and any whitespace; falls back to a hard cut.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum characters per chunk. Keeps chunks small enough for embedding models.
pub const DEFAULT_MAX_CHARS: usize = 512;

/// Default number of chars repeated between neighbouring chunks.
pub const DEFAULT_OVERLAP: usize = 64;

/// A boundary is only taken once the chunk is at least this full (percent of the limit).
const MIN_FILL_PERCENT: usize = 30;

/// A chunk of text from a crawled page, with source reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Page URL or path the chunk came from.
    pub source_id: String,
    /// Index of this chunk within its source (0, 1, 2, …).
    pub sequence_index: usize,
    /// Optional LLM summary, attached before the chunk is stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Chunk {
    pub fn new(source_id: impl Into<String>, sequence_index: usize, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            sequence_index,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// True when there is nothing worth embedding.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Where a chunk may end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boundary {
    /// Break after a paragraph, sentence or whitespace near the limit when one exists.
    #[default]
    Prefer,
    /// Always cut at exactly the limit.
    Hard,
}

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    max_chars: usize,
    overlap: usize,
    boundary: Boundary,
}

impl ChunkerConfig {
    /// Requires `0 <= overlap < max_chars`.
    pub fn new(max_chars: usize, overlap: usize) -> Result<Self, ChunkError> {
        if max_chars == 0 {
            return Err(ChunkError::InvalidArgument(
                "max chunk size must be positive".to_string(),
            ));
        }
        if overlap >= max_chars {
            return Err(ChunkError::InvalidArgument(format!(
                "overlap {overlap} must be smaller than max chunk size {max_chars}"
            )));
        }
        Ok(Self {
            max_chars,
            overlap,
            boundary: Boundary::Prefer,
        })
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            overlap: DEFAULT_OVERLAP,
            boundary: Boundary::Prefer,
        }
    }
}

/// Chunk `text` with the default boundary policy.
pub fn chunk(
    source_id: &str,
    text: &str,
    max_chars: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ChunkError> {
    let config = ChunkerConfig::new(max_chars, overlap)?;
    Ok(chunk_text(source_id, text, &config))
}

/// Chunk `text` into pieces of at most `config.max_chars()` chars, in reading order.
/// Chunks are not trimmed, so with zero overlap they concatenate back to `text`.
pub fn chunk_text(source_id: &str, text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    split_spans(&chars, config)
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| Chunk::new(source_id, i, chars[start..end].iter().collect::<String>()))
        .collect()
}

/// Returns `[start, end)` char ranges covering `chars`.
fn split_spans(chars: &[char], config: &ChunkerConfig) -> Vec<(usize, usize)> {
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;
    while start < len {
        let hard_end = start + config.max_chars;
        if hard_end >= len {
            spans.push((start, len));
            break;
        }
        let end = match config.boundary {
            Boundary::Hard => hard_end,
            Boundary::Prefer => find_break(chars, start, hard_end, config).unwrap_or(hard_end),
        };
        spans.push((start, end));
        // end - start > overlap always holds, so this advances.
        start = end - config.overlap;
    }
    spans
}

/// Prefer the start of a code fence, then a paragraph break, a sentence end and
/// whitespace; within a rule the latest position wins.
fn find_break(chars: &[char], start: usize, hard_end: usize, config: &ChunkerConfig) -> Option<usize> {
    let min_fill = config.max_chars * MIN_FILL_PERCENT / 100;
    let floor = start + min_fill.max(config.overlap + 1);
    if floor > hard_end {
        return None;
    }
    let rules: [fn(&[char], usize) -> bool; 4] =
        [ends_before_fence, ends_paragraph, ends_sentence, ends_whitespace];
    rules
        .iter()
        .find_map(|rule| (floor..=hard_end).rev().find(|&pos| rule(chars, pos)))
}

/// A ``` marker starts at `pos`.
fn ends_before_fence(chars: &[char], pos: usize) -> bool {
    chars.get(pos..pos + 3) == Some(&['`', '`', '`'][..])
}

fn ends_paragraph(chars: &[char], pos: usize) -> bool {
    pos >= 2 && chars[pos - 1] == '\n' && chars[pos - 2] == '\n'
}

fn ends_sentence(chars: &[char], pos: usize) -> bool {
    pos >= 2 && chars[pos - 1].is_whitespace() && matches!(chars[pos - 2], '.' | '!' | '?')
}

fn ends_whitespace(chars: &[char], pos: usize) -> bool {
    pos >= 1 && chars[pos - 1].is_whitespace()
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunking argument: {0}")]
    InvalidArgument(String),
}
