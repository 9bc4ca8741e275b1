//! Vector math shared by the text and image branches.

use crate::error::{Result, SimilarityError};

/// A fixed-length embedding produced by one of the encoders.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        l2_norm(&self.0)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn check_finite(v: &[f32]) -> Result<()> {
    if v.iter().any(|x| !x.is_finite()) {
        return Err(SimilarityError::DegenerateVector(
            "vector contains non-finite values".into(),
        ));
    }
    Ok(())
}

/// L2-normalize a vector.
///
/// Zero-norm input is rejected instead of producing NaN components.
pub fn normalize(v: &[f32]) -> Result<Embedding> {
    if v.is_empty() {
        return Err(SimilarityError::DegenerateVector("vector is empty".into()));
    }
    check_finite(v)?;

    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return Err(SimilarityError::DegenerateVector(format!(
            "cannot normalize vector of {} dims with norm {}",
            v.len(),
            norm
        )));
    }

    Ok(Embedding(v.iter().map(|x| x / norm).collect()))
}

/// Cosine similarity between two embeddings.
///
/// Norms are recomputed so the function stays correct for inputs that were
/// never normalized. The result is clamped to [-1, 1] to absorb rounding.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            text: a.len(),
            image: b.len(),
        });
    }
    check_finite(a)?;
    check_finite(b)?;

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(SimilarityError::DegenerateVector(
            "cosine similarity of a zero vector is undefined".into(),
        ));
    }

    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Element-wise mean of equally sized vectors.
pub fn mean(vectors: &[Embedding]) -> Result<Embedding> {
    let first = vectors
        .first()
        .ok_or_else(|| SimilarityError::EmptyInput("no vectors to average".into()))?;
    let dim = first.dim();

    let mut sum = vec![0.0f32; dim];
    for v in vectors {
        if v.dim() != dim {
            return Err(SimilarityError::DimensionMismatch {
                text: dim,
                image: v.dim(),
            });
        }
        for (acc, x) in sum.iter_mut().zip(v.as_slice()) {
            *acc += x;
        }
    }

    let n = vectors.len() as f32;
    Ok(Embedding(sum.into_iter().map(|x| x / n).collect()))
}
