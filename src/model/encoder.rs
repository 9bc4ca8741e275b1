//! CLIP text and vision encoders using ONNX Runtime

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

use super::{ImageEncoder, PixelTensor, TextEncoder, TokenWindow};
use crate::error::{Result, SimilarityError};

/// Build an optimized inference session for one encoder graph.
fn build_session(path: &Path, intra_threads: usize) -> Result<Session> {
    let session = Session::builder()
        .map_err(|e| SimilarityError::ModelLoad(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| SimilarityError::ModelLoad(e.to_string()))?
        .with_intra_threads(intra_threads)
        .map_err(|e| SimilarityError::ModelLoad(e.to_string()))?
        .commit_from_file(path)
        .map_err(|e| {
            SimilarityError::ModelLoad(format!("failed to load {}: {}", path.display(), e))
        })?;

    tracing::debug!(path = %path.display(), "ONNX session ready");
    Ok(session)
}

/// Pull a single embedding out of a `[1, D]` (or `[D]`) output tensor.
fn extract_embedding(outputs: &ort::session::SessionOutputs, name: &str) -> Result<Vec<f32>> {
    let output = outputs
        .get(name)
        .ok_or_else(|| SimilarityError::Encode(format!("model has no output named '{}'", name)))?;

    let (shape, data) = output
        .try_extract_tensor::<f32>()
        .map_err(|e| SimilarityError::Encode(format!("failed to extract '{}': {}", name, e)))?;

    let dims: Vec<i64> = shape.iter().copied().collect();
    match dims.as_slice() {
        [1, d] | [d] if *d as usize == data.len() => Ok(data.to_vec()),
        _ => Err(SimilarityError::Encode(format!(
            "unexpected '{}' shape {:?}, expected [1, D]",
            name, dims
        ))),
    }
}

/// Text encoder (`CLIPTextModelWithProjection` export).
pub struct OrtTextEncoder {
    session: Mutex<Session>,
    output: String,
    feed_attention_mask: bool,
}

impl OrtTextEncoder {
    pub fn from_file(
        path: &Path,
        intra_threads: usize,
        output: impl Into<String>,
        feed_attention_mask: bool,
    ) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(build_session(path, intra_threads)?),
            output: output.into(),
            feed_attention_mask,
        })
    }
}

impl TextEncoder for OrtTextEncoder {
    fn encode(&self, window: &TokenWindow) -> Result<Vec<f32>> {
        if window.is_empty() {
            return Err(SimilarityError::EmptyInput("token window is empty".into()));
        }

        let len = window.len();
        let ids = Tensor::from_array(([1usize, len], window.ids.clone().into_boxed_slice()))
            .map_err(|e| SimilarityError::Encode(format!("failed to build input_ids: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| SimilarityError::Encode(format!("failed to lock text session: {}", e)))?;

        let outputs = if self.feed_attention_mask {
            let mask = Tensor::from_array((
                [1usize, len],
                window.attention_mask.clone().into_boxed_slice(),
            ))
            .map_err(|e| SimilarityError::Encode(format!("failed to build attention_mask: {}", e)))?;
            session.run(ort::inputs!["input_ids" => ids, "attention_mask" => mask])
        } else {
            session.run(ort::inputs!["input_ids" => ids])
        }
        .map_err(|e| SimilarityError::Encode(format!("text inference failed: {}", e)))?;

        extract_embedding(&outputs, &self.output)
    }
}

/// Vision encoder (`CLIPVisionModelWithProjection` export).
pub struct OrtImageEncoder {
    session: Mutex<Session>,
    output: String,
}

impl OrtImageEncoder {
    pub fn from_file(path: &Path, intra_threads: usize, output: impl Into<String>) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(build_session(path, intra_threads)?),
            output: output.into(),
        })
    }
}

impl ImageEncoder for OrtImageEncoder {
    fn encode(&self, pixels: &PixelTensor) -> Result<Vec<f32>> {
        let expected: usize = pixels.shape.iter().product();
        if expected != pixels.data.len() {
            return Err(SimilarityError::Encode(format!(
                "pixel tensor has {} values for shape {:?}",
                pixels.data.len(),
                pixels.shape
            )));
        }

        let input = Tensor::from_array((pixels.shape, pixels.data.clone().into_boxed_slice()))
            .map_err(|e| SimilarityError::Encode(format!("failed to build pixel_values: {}", e)))?;

        let mut session = self.session.lock().map_err(|e| {
            SimilarityError::Encode(format!("failed to lock vision session: {}", e))
        })?;

        let outputs = session
            .run(ort::inputs!["pixel_values" => input])
            .map_err(|e| SimilarityError::Encode(format!("vision inference failed: {}", e)))?;

        extract_embedding(&outputs, &self.output)
    }
}
