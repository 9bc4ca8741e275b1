//! Text-image similarity scoring with CLIP-style dual encoders.
//!
//! Text and an image are projected into a shared embedding space and
//! compared by cosine similarity. Long text is split into encoder-sized
//! chunks whose embeddings are pooled. Model artifacts are fetched once
//! per process and shared by every request.

pub mod aggregate;
pub mod chunker;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod vector;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, SimilarityError};
pub use vector::{cosine_similarity, normalize, Embedding};
pub use worker::{Event, SimilarityRequest, WorkerHandle};
