//! Lazy, memoized construction of the model bundle.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

use super::{ModelBundle, ModelSource, ProgressEvent, ProgressSink};
use crate::error::{Result, SimilarityError};

/// Builds a [`ModelBundle`] for a source. Runs on a blocking thread.
pub trait BundleLoader: Send + Sync {
    fn load(&self, source: &ModelSource, progress: &dyn Fn(ProgressEvent)) -> Result<ModelBundle>;
}

/// Owns the single model bundle of the process.
///
/// The first `acquire` builds the bundle; concurrent callers wait on that
/// same construction. A failed construction leaves the cell empty so the
/// next call retries.
pub struct ModelProvider {
    loader: Arc<dyn BundleLoader>,
    bundle: OnceCell<Arc<ModelBundle>>,
}

impl ModelProvider {
    pub fn new(loader: Arc<dyn BundleLoader>) -> Self {
        Self {
            loader,
            bundle: OnceCell::new(),
        }
    }

    /// Check if the bundle has been built
    pub fn is_ready(&self) -> bool {
        self.bundle.initialized()
    }

    /// The bundle, if already built.
    pub fn get(&self) -> Option<Arc<ModelBundle>> {
        self.bundle.get().cloned()
    }

    /// Return the bundle, building it on first use.
    ///
    /// `progress` only receives events when this call performs the build.
    pub async fn acquire(
        &self,
        source: &ModelSource,
        progress: ProgressSink,
    ) -> Result<Arc<ModelBundle>> {
        let bundle = self
            .bundle
            .get_or_try_init(|| async move {
                let loader = Arc::clone(&self.loader);
                let owned = source.clone();
                let started = Instant::now();
                tracing::info!(model = %owned, "Building model bundle");

                let result =
                    match tokio::task::spawn_blocking(move || loader.load(&owned, &*progress)).await
                    {
                        Ok(result) => result,
                        Err(join_err) => Err(SimilarityError::from(join_err)),
                    };

                match result {
                    Ok(bundle) => {
                        tracing::info!(
                            model = %bundle.source(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Model bundle ready"
                        );
                        Ok(Arc::new(bundle))
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Model bundle construction failed");
                        Err(e)
                    }
                }
            })
            .await?;

        if bundle.source() != source {
            return Err(SimilarityError::ModelLoad(format!(
                "provider is bound to {}, cannot switch to {}",
                bundle.source(),
                source
            )));
        }

        Ok(Arc::clone(bundle))
    }
}
