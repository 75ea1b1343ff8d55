//! Splits extracted text into overlapping token windows.
//!
//! Tokens are the non-whitespace word-boundary segments of the text. A chunk
//! covers up to `max_tokens` tokens; consecutive chunks share
//! `floor(max_tokens * overlap)` tokens. Every chunk's span runs from its
//! first token to the first token after the window (or to the end of the
//! text for the last chunk), so the spans cover every byte of the text.

use unicode_segmentation::UnicodeSegmentation;
use vecsync_types::ChunkingSettings;

/// One chunk of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the document's chunk sequence
    pub offset: u32,
    /// Byte span in the source text
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Deterministic fixed-window chunker.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    pub fn new(max_tokens: usize, overlap: f32) -> Self {
        let max_tokens = max_tokens.max(1);
        let overlap_tokens = ((max_tokens as f32 * overlap.clamp(0.0, 1.0)) as usize)
            .min(max_tokens - 1);
        Self {
            max_tokens,
            overlap_tokens,
        }
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Self {
        Self::new(settings.max_tokens, settings.overlap)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Tokens shared by consecutive chunks
    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let tokens: Vec<(usize, usize)> = text
            .split_word_bound_indices()
            .filter(|(_, seg)| !seg.chars().all(char::is_whitespace))
            .map(|(start, seg)| (start, start + seg.len()))
            .collect();

        if tokens.is_empty() {
            return vec![Chunk {
                offset: 0,
                start: 0,
                end: text.len(),
                text: text.to_string(),
            }];
        }

        let step = self.max_tokens - self.overlap_tokens;
        let mut chunks = Vec::new();
        let mut first = 0usize;
        loop {
            let last = (first + self.max_tokens).min(tokens.len());
            let start = if first == 0 { 0 } else { tokens[first].0 };
            let end = if last == tokens.len() {
                text.len()
            } else {
                tokens[last].0
            };
            chunks.push(Chunk {
                offset: chunks.len() as u32,
                start,
                end,
                text: text[start..end].to_string(),
            });
            if last == tokens.len() {
                break;
            }
            first += step;
        }
        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::from_settings(&ChunkingSettings::default())
    }
}
