//! Tokenizer backed by a hub `tokenizer.json`.

use std::path::Path;
use tokenizers::{Tokenizer, TruncationDirection};

use super::{TextTokenizer, TokenWindow};
use crate::error::{Result, SimilarityError};

/// CLIP BPE tokenizer with fixed-window encoding.
///
/// Padding and truncation configured in `tokenizer.json` are cleared; the
/// window size is chosen per call instead.
pub struct ClipTokenizer {
    tokenizer: Tokenizer,
    pad_id: u32,
    special_tokens: usize,
}

impl ClipTokenizer {
    /// Load from a `tokenizer.json` file. `pad_token` fills the unused tail
    /// of every window (CLIP pads with its end-of-text token).
    pub fn from_file(path: &Path, pad_token: &str) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            SimilarityError::ModelLoad(format!(
                "failed to load tokenizer {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_tokenizer(tokenizer, pad_token)
    }

    pub fn from_tokenizer(mut tokenizer: Tokenizer, pad_token: &str) -> Result<Self> {
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(None)
            .map_err(|e| SimilarityError::ModelLoad(format!("failed to reset truncation: {}", e)))?;

        let pad_id = match tokenizer.token_to_id(pad_token) {
            Some(id) => id,
            None => {
                tracing::warn!(pad_token = %pad_token, "Pad token not in vocabulary, padding with id 0");
                0
            }
        };

        let special_tokens = tokenizer
            .encode("", true)
            .map_err(|e| SimilarityError::ModelLoad(format!("tokenizer self-check failed: {}", e)))?
            .get_ids()
            .len();

        Ok(Self {
            tokenizer,
            pad_id,
            special_tokens,
        })
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }
}

impl TextTokenizer for ClipTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| SimilarityError::Encode(format!("tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| SimilarityError::Encode(format!("decode failed: {}", e)))
    }

    fn encode_window(&self, text: &str, window: usize) -> Result<TokenWindow> {
        let mut content = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| SimilarityError::Encode(format!("tokenization failed: {}", e)))?;

        // Truncate the content, not the framed sequence, so the end-of-text
        // token the encoder pools on survives.
        let budget = window.saturating_sub(self.special_tokens);
        if content.len() > budget {
            tracing::debug!(tokens = content.len(), budget, "Truncating text to encoder window");
            content.truncate(budget, 0, TruncationDirection::Right);
        }

        let encoding = self
            .tokenizer
            .post_process(content, None, true)
            .map_err(|e| SimilarityError::Encode(format!("post-processing failed: {}", e)))?;

        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mut attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();

        ids.truncate(window);
        attention_mask.truncate(window);
        ids.resize(window, self.pad_id as i64);
        attention_mask.resize(window, 0);

        Ok(TokenWindow { ids, attention_mask })
    }

    fn special_token_count(&self) -> usize {
        self.special_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_word_level_tokenizer;

    fn load() -> (tempfile::TempDir, ClipTokenizer) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_word_level_tokenizer(dir.path(), &["a", "photo", "of", "dog", "cat"]);
        let tokenizer = ClipTokenizer::from_file(&path, "<eos>").unwrap();
        (dir, tokenizer)
    }

    #[test]
    fn test_special_token_count() {
        let (_dir, tokenizer) = load();
        assert_eq!(tokenizer.special_token_count(), 2);
    }

    #[test]
    fn test_tokenize_and_decode() {
        let (_dir, tokenizer) = load();
        let ids = tokenizer.tokenize("a photo of a dog").unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(tokenizer.decode(&ids).unwrap(), "a photo of a dog");
    }

    #[test]
    fn test_encode_window_pads() {
        let (_dir, tokenizer) = load();
        let window = tokenizer.encode_window("a dog", 8).unwrap();
        assert_eq!(window.len(), 8);
        // <bos> a dog <eos> + 4 pad
        assert_eq!(window.attention_mask, vec![1, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(window.ids[4], tokenizer.pad_id() as i64);
    }

    #[test]
    fn test_encode_window_truncates_but_keeps_eos() {
        let (_dir, tokenizer) = load();
        let window = tokenizer.encode_window("a photo of a dog a photo of a cat", 5).unwrap();
        assert_eq!(window.len(), 5);
        assert_eq!(window.attention_mask, vec![1; 5]);
        let eos = tokenizer.pad_id() as i64;
        assert_eq!(window.ids[4], eos);
    }

    #[test]
    fn test_missing_file() {
        let err = ClipTokenizer::from_file(Path::new("/nonexistent/tokenizer.json"), "<eos>")
            .err()
            .unwrap();
        assert!(matches!(err, SimilarityError::ModelLoad(_)));
    }
}
