//! Turning chunks and images into single unit-length embeddings.

use crate::chunker::TextChunk;
use crate::error::{Result, SimilarityError};
use crate::model::{ImageEncoder, ImagePreprocessor, TextEncoder, TextTokenizer};
use crate::vector::{self, Embedding};

/// Combine per-chunk unit vectors: mean, then renormalize.
///
/// A single vector passes through untouched so one-chunk text is exactly
/// the normalized encoder output.
pub fn pool(mut normalized: Vec<Embedding>) -> Result<Embedding> {
    if normalized.len() > 1 {
        let mean = vector::mean(&normalized)?;
        return vector::normalize(mean.as_slice());
    }
    normalized
        .pop()
        .ok_or_else(|| SimilarityError::EmptyInput("no chunk embeddings to pool".into()))
}

/// Encode each chunk in its own `window`-token pass and pool the results.
pub fn embed_text(
    chunks: &[TextChunk],
    tokenizer: &dyn TextTokenizer,
    encoder: &dyn TextEncoder,
    window: usize,
) -> Result<Embedding> {
    if chunks.is_empty() {
        return Err(SimilarityError::EmptyInput("text produced no chunks".into()));
    }

    let mut normalized = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let tokens = tokenizer.encode_window(&chunk.text, window)?;
        let raw = encoder.encode(&tokens)?;
        normalized.push(vector::normalize(&raw)?);
    }

    let pooled = pool(normalized)?;
    tracing::debug!(chunks = chunks.len(), dims = pooled.dim(), "Embedded text");
    Ok(pooled)
}

/// Decode image bytes, preprocess, encode and normalize.
pub fn embed_image(
    bytes: &[u8],
    preprocessor: &dyn ImagePreprocessor,
    encoder: &dyn ImageEncoder,
) -> Result<Embedding> {
    if bytes.is_empty() {
        return Err(SimilarityError::EmptyInput("image has no bytes".into()));
    }

    let image = image::load_from_memory(bytes)
        .map_err(|e| SimilarityError::ImageFetch(format!("failed to decode image: {}", e)))?;

    let pixels = preprocessor.preprocess(&image)?;
    let raw = encoder.encode(&pixels)?;
    let embedding = vector::normalize(&raw)?;

    tracing::debug!(
        width = image.width(),
        height = image.height(),
        dims = embedding.dim(),
        "Embedded image"
    );
    Ok(embedding)
}
