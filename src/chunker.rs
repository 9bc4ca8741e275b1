//! Token-bounded text chunking.
//!
//! Text encoders accept a fixed token window (77 for CLIP). Longer input is
//! cut into consecutive windows that are encoded separately and pooled,
//! instead of being silently truncated.

use std::ops::Range;

use crate::error::{Result, SimilarityError};
use crate::model::TextTokenizer;

/// Chunk limit meaning "never split"; the encoder truncates instead.
pub const UNBOUNDED: usize = usize::MAX;

/// A slice of the input, rebuilt by decoding its token ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    /// Half-open token span within the full tokenization.
    pub span: Range<usize>,
}

impl TextChunk {
    pub fn token_count(&self) -> usize {
        self.span.len()
    }
}

/// Split `text` into chunks of at most `max_tokens` tokens.
///
/// Spans are contiguous, in order and together cover every token. Empty
/// text yields no chunks. [`UNBOUNDED`] is just a window no text can fill,
/// so the whole text comes back as one decoded chunk.
pub fn split(text: &str, tokenizer: &dyn TextTokenizer, max_tokens: usize) -> Result<Vec<TextChunk>> {
    if max_tokens == 0 {
        return Err(SimilarityError::InvalidConfig(
            "max_tokens must be at least 1".into(),
        ));
    }

    let ids = tokenizer.tokenize(text)?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::with_capacity(ids.len().div_ceil(max_tokens));
    let mut start = 0;
    for window in ids.chunks(max_tokens) {
        let end = start + window.len();
        chunks.push(TextChunk {
            text: tokenizer.decode(window)?,
            span: start..end,
        });
        start = end;
    }

    tracing::debug!(tokens = ids.len(), max_tokens, chunks = chunks.len(), "Split text");
    Ok(chunks)
}
