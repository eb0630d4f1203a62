//! Chunking utilities for splitting long documents into overlapping segments.
//!
//! Documents are split into windows of at most `chunk_size` characters that
//! each get embedded separately. Window ends prefer sentence boundaries, then
//! whitespace, and only fall back to a hard cut when neither exists within
//! the lookback window. Each window after the first starts roughly `overlap`
//! characters before the previous window's cut, aligned to a word start.
//!
//! Sizes are counted in Unicode scalar values; offsets are byte offsets into
//! the source text.

use serde::Serialize;

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 64;

/// Upper bound on how far back from the target end a boundary is searched.
const MAX_LOOKBACK: usize = 100;

/// Chunking parameters for one ingestion call.
///
/// # Examples
///
/// ```
/// use docwhisper::chunking::ChunkingConfig;
///
/// let config = ChunkingConfig::new(40, 10);
/// assert!(config.validate().is_ok());
///
/// // Overlap must be strictly smaller than the chunk size
/// assert!(ChunkingConfig::new(10, 10).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Reject sizes the chunker cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

/// A contiguous span of a document's text.
///
/// `text` is always non-empty and never starts or ends with whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The segment text.
    pub text: String,
    /// Byte offset where this segment starts in the source text.
    pub offset: usize,
}

impl Segment {
    /// Byte offset one past the end of this segment in the source text.
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }
}

/// Split text into boundary-aware, overlapping segments.
///
/// Empty or whitespace-only input yields no segments. Fails with a
/// configuration error when `chunk_size` is zero or `overlap` is not smaller
/// than `chunk_size`.
///
/// # Examples
///
/// ```
/// use docwhisper::chunking::chunk_text;
///
/// // Short text returns a single chunk
/// let chunks = chunk_text("Hello, world!", 1000, 0).unwrap();
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// // Long text gets split
/// let text = "word ".repeat(500);
/// let chunks = chunk_text(&text, 100, 20).unwrap();
/// assert!(chunks.len() >= 2);
///
/// assert!(chunk_text("   ", 10, 2).unwrap().is_empty());
/// ```
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Segment>> {
    ChunkingConfig::new(chunk_size, overlap).validate()?;

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let chars = CharView {
        text,
        chars: &chars,
    };

    let mut start = 0;
    while start < chars.len() && chars.is_space(start) {
        start += 1;
    }
    let mut end = chars.len();
    while end > start && chars.is_space(end - 1) {
        end -= 1;
    }

    let mut segments = Vec::new();
    if start >= end {
        return Ok(segments);
    }

    let mut prev_cut = start;
    loop {
        if end - start <= chunk_size {
            segments.push(chars.segment(start, end));
            break;
        }

        let cut = find_boundary(&chars, start, prev_cut, chunk_size, overlap);
        let mut segment_end = cut;
        while segment_end > start && chars.is_space(segment_end - 1) {
            segment_end -= 1;
        }
        segments.push(chars.segment(start, segment_end));

        start = next_start(&chars, start, cut, overlap);
        prev_cut = cut;
    }

    Ok(segments)
}

/// Char-indexed view over a string that remembers byte positions.
struct CharView<'a> {
    text: &'a str,
    chars: &'a [(usize, char)],
}

impl CharView<'_> {
    fn len(&self) -> usize {
        self.chars.len()
    }

    fn char_at(&self, idx: usize) -> char {
        self.chars[idx].1
    }

    fn is_space(&self, idx: usize) -> bool {
        self.char_at(idx).is_whitespace()
    }

    fn byte_at(&self, idx: usize) -> usize {
        self.chars
            .get(idx)
            .map_or(self.text.len(), |(byte, _)| *byte)
    }

    fn segment(&self, start: usize, end: usize) -> Segment {
        let offset = self.byte_at(start);
        Segment {
            text: self.text[offset..self.byte_at(end)].to_string(),
            offset,
        }
    }
}

/// Pick the char index where the chunk starting at `start` ends.
///
/// Never returns a position at or before `start + overlap`, nor at or
/// before `prev_cut`, so every chunk extends the covered text.
fn find_boundary(
    chars: &CharView<'_>,
    start: usize,
    prev_cut: usize,
    chunk_size: usize,
    overlap: usize,
) -> usize {
    let target = start + chunk_size;
    let min_cut = (start + overlap).max(prev_cut) + 1;

    let sentence_floor =
        min_cut.max(target.saturating_sub((chunk_size / 5).min(MAX_LOOKBACK)));
    let sentence_end = (sentence_floor..=target).rev().find(|&pos| {
        chars.is_space(pos) && matches!(chars.char_at(pos - 1), '.' | '!' | '?')
    });
    if let Some(cut) = sentence_end {
        return cut;
    }

    let word_floor =
        min_cut.max(target.saturating_sub((chunk_size / 2).min(MAX_LOOKBACK)));
    (word_floor..=target)
        .rev()
        .find(|&pos| chars.is_space(pos))
        .unwrap_or(target)
}

/// Pick the char index where the chunk after `[start, cut)` begins.
fn next_start(
    chars: &CharView<'_>,
    start: usize,
    cut: usize,
    overlap: usize,
) -> usize {
    let raw = cut.saturating_sub(overlap).max(start + 1);

    if chars.is_space(raw) {
        let mut pos = raw;
        while pos < chars.len() && chars.is_space(pos) {
            pos += 1;
        }
        return pos;
    }

    // Landed mid-word: move back to the word start so no word is split.
    let mut pos = raw;
    while pos > 0 && !chars.is_space(pos - 1) {
        pos -= 1;
    }
    if pos > start {
        return pos;
    }

    // The word began at or before `start`: take the next word start instead.
    let mut pos = raw;
    while pos < cut && !chars.is_space(pos) {
        pos += 1;
    }
    while pos < cut && chars.is_space(pos) {
        pos += 1;
    }
    if pos < cut { pos } else { raw }
}
