use thiserror::Error;

/// Errors surfaced by the similarity pipeline.
///
/// Every variant carries a human-readable cause; the worker relays the
/// `Display` text verbatim in its `error` event.
#[derive(Debug, Clone, Error)]
pub enum SimilarityError {
    /// Artifact download, cache I/O, tokenizer parse or session build failed.
    /// Never cached: the next `acquire` retries from scratch.
    #[error("model load failed: {0}")]
    ModelLoad(String),
    /// The image location could not be read or its bytes could not be decoded.
    #[error("image fetch failed: {0}")]
    ImageFetch(String),
    /// Tokenizer or encoder invocation failed.
    #[error("encode failed: {0}")]
    Encode(String),
    /// Blank text, zero chunks or empty image bytes.
    #[error("empty input: {0}")]
    EmptyInput(String),
    /// A vector with zero norm or non-finite components.
    #[error("degenerate vector: {0}")]
    DegenerateVector(String),
    #[error("dimension mismatch: text embedding has {text} dims, image embedding has {image}")]
    DimensionMismatch { text: usize, image: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// The background worker went away or a blocking task panicked.
    #[error("worker failure: {0}")]
    Worker(String),
}

impl SimilarityError {
    /// Short machine-friendly tag, used as a tracing field.
    pub fn kind(&self) -> &'static str {
        match self {
            SimilarityError::ModelLoad(_) => "model_load",
            SimilarityError::ImageFetch(_) => "image_fetch",
            SimilarityError::Encode(_) => "encode",
            SimilarityError::EmptyInput(_) => "empty_input",
            SimilarityError::DegenerateVector(_) => "degenerate_vector",
            SimilarityError::DimensionMismatch { .. } => "dimension_mismatch",
            SimilarityError::InvalidConfig(_) => "invalid_config",
            SimilarityError::Worker(_) => "worker",
        }
    }
}

impl From<tokio::task::JoinError> for SimilarityError {
    fn from(err: tokio::task::JoinError) -> Self {
        SimilarityError::Worker(format!("background task failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SimilarityError>;
