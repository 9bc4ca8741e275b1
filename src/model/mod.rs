//! CLIP (Contrastive Language-Image Pre-training) model bundle
//!
//! A bundle holds the four artifacts needed to score text against an image:
//! - a tokenizer (text -> token ids, and back)
//! - an image preprocessor (decoded image -> pixel tensor)
//! - a text encoder and a vision encoder (tensor -> embedding)
//!
//! Each artifact sits behind a trait so the pipeline can be driven by the
//! ONNX-backed implementations or by lightweight fakes.

pub mod encoder;
pub mod hub;
pub mod preprocess;
pub mod provider;
pub mod tokenizer;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

pub use encoder::{OrtImageEncoder, OrtTextEncoder};
pub use hub::{HubLoader, HubOptions};
pub use preprocess::ClipPreprocessor;
pub use provider::{BundleLoader, ModelProvider};
pub use tokenizer::ClipTokenizer;

/// Numeric precision of the ONNX encoder graphs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Fp32,
    /// 8-bit quantized weights, float32 inputs and outputs.
    Q8,
}

impl Precision {
    /// Suffix used by hub exports, e.g. `onnx/text_model_quantized.onnx`.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Precision::Fp32 => "",
            Precision::Q8 => "_quantized",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Fp32 => write!(f, "fp32"),
            Precision::Q8 => write!(f, "q8"),
        }
    }
}

/// Identifies which model a bundle was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelSource {
    pub model_id: String,
    pub revision: String,
    pub precision: Precision,
}

impl ModelSource {
    pub fn new(model_id: impl Into<String>, precision: Precision) -> Self {
        Self {
            model_id: model_id.into(),
            revision: "main".to_string(),
            precision,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.model_id, self.revision, self.precision)
    }
}

/// Load progress for a single artifact file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// File path within the model repository, e.g. `onnx/text_model.onnx`.
    pub file: String,
    /// Model identifier the file belongs to.
    pub name: String,
    pub loaded: u64,
    /// Zero when the transfer length is unknown.
    pub total: u64,
    /// Percent complete, 0-100.
    pub progress: f64,
}

impl ProgressEvent {
    pub fn new(file: impl Into<String>, name: impl Into<String>, loaded: u64, total: u64) -> Self {
        let progress = if total == 0 {
            0.0
        } else {
            (loaded as f64 / total as f64 * 100.0).min(100.0)
        };
        Self {
            file: file.into(),
            name: name.into(),
            loaded,
            total,
            progress,
        }
    }

    /// Whether the transfer length is known.
    pub fn is_determinate(&self) -> bool {
        self.total > 0
    }
}

/// Receives load progress while a bundle is being built.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// A sink that drops every event.
pub fn ignore_progress() -> ProgressSink {
    Arc::new(|_| {})
}

/// Token ids for one encoder window, padded and truncated to a fixed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWindow {
    pub ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl TokenWindow {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A preprocessed image in NCHW layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelTensor {
    pub shape: [usize; 4],
    pub data: Vec<f32>,
}

/// Text <-> token id conversion.
pub trait TextTokenizer: Send + Sync {
    /// Tokenize without truncation, padding or special tokens.
    fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode ids back to text, dropping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Encode text for the encoder: special tokens added, then padded or
    /// truncated to exactly `window` ids.
    fn encode_window(&self, text: &str, window: usize) -> Result<TokenWindow>;

    /// Number of special tokens `encode_window` adds around the content.
    fn special_token_count(&self) -> usize;
}

/// Turns a decoded image into the tensor the vision encoder expects.
pub trait ImagePreprocessor: Send + Sync {
    fn preprocess(&self, image: &DynamicImage) -> Result<PixelTensor>;
}

/// Projects one token window into the shared embedding space.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, window: &TokenWindow) -> Result<Vec<f32>>;
}

/// Projects one preprocessed image into the shared embedding space.
pub trait ImageEncoder: Send + Sync {
    fn encode(&self, pixels: &PixelTensor) -> Result<Vec<f32>>;
}

/// The four inference artifacts, bound to one model source.
///
/// Built once by [`ModelProvider`] and read-only afterwards.
pub struct ModelBundle {
    source: ModelSource,
    tokenizer: Arc<dyn TextTokenizer>,
    preprocessor: Arc<dyn ImagePreprocessor>,
    text_encoder: Arc<dyn TextEncoder>,
    image_encoder: Arc<dyn ImageEncoder>,
}

impl ModelBundle {
    pub fn new(
        source: ModelSource,
        tokenizer: Arc<dyn TextTokenizer>,
        preprocessor: Arc<dyn ImagePreprocessor>,
        text_encoder: Arc<dyn TextEncoder>,
        image_encoder: Arc<dyn ImageEncoder>,
    ) -> Self {
        Self {
            source,
            tokenizer,
            preprocessor,
            text_encoder,
            image_encoder,
        }
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub fn tokenizer(&self) -> &Arc<dyn TextTokenizer> {
        &self.tokenizer
    }

    pub fn preprocessor(&self) -> &Arc<dyn ImagePreprocessor> {
        &self.preprocessor
    }

    pub fn text_encoder(&self) -> &Arc<dyn TextEncoder> {
        &self.text_encoder
    }

    pub fn image_encoder(&self) -> &Arc<dyn ImageEncoder> {
        &self.image_encoder
    }
}

impl fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBundle")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
