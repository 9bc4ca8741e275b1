//! Background similarity worker.
//!
//! A [`WorkerHandle`] owns one tokio task that drains a bounded job queue
//! and runs each request through a [`RequestController`]. Requests are
//! processed strictly one after another, so the events of two requests
//! never interleave. A full queue makes `submit` wait rather than fail.

pub mod controller;
pub mod protocol;

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

pub use controller::{ControllerState, EventSender, PipelineSettings, RequestController};
pub use protocol::{Event, SimilarityRequest};

use crate::config::Config;
use crate::error::{Result, SimilarityError};
use crate::fetch::ImageFetcher;
use crate::model::{HubLoader, ModelProvider};

struct Job {
    request: SimilarityRequest,
    events: EventSender,
    /// Typed outcome; the event stream only carries the error text.
    result: Option<oneshot::Sender<Result<f32>>>,
}

/// Handle to a running worker. Cloning shares the same worker.
#[derive(Clone)]
pub struct WorkerHandle {
    jobs: mpsc::Sender<Job>,
    state: watch::Receiver<ControllerState>,
}

impl WorkerHandle {
    /// Start the worker task on the current runtime.
    pub fn spawn(controller: RequestController, queue_depth: usize) -> Self {
        let (jobs, mut rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let state = controller.subscribe();
        let controller = Arc::new(controller);

        tokio::spawn(async move {
            tracing::debug!("Similarity worker started");
            while let Some(job) = rx.recv().await {
                let result = controller.handle(job.request, &job.events).await;
                if let Some(tx) = job.result {
                    let _ = tx.send(result);
                }
            }
            tracing::debug!("Similarity worker stopped");
        });

        Self { jobs, state }
    }

    /// Start a worker backed by the hub loader described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let provider = Arc::new(ModelProvider::new(Arc::new(HubLoader::new(
            config.hub_options(),
        ))));
        let controller = RequestController::new(
            provider,
            config.model_source(),
            config.pipeline_settings(),
            ImageFetcher::new(config.timeout()),
        );
        tracing::info!(
            model = %config.model_source(),
            queue_depth = config.worker.queue_depth,
            "Starting similarity worker"
        );
        Self::spawn(controller, config.worker.queue_depth)
    }

    async fn enqueue(
        &self,
        request: SimilarityRequest,
        result: Option<oneshot::Sender<Result<f32>>>,
    ) -> Result<mpsc::UnboundedReceiver<Event>> {
        let (events, rx) = mpsc::unbounded_channel();
        self.jobs
            .send(Job {
                request,
                events,
                result,
            })
            .await
            .map_err(|_| SimilarityError::Worker("worker has shut down".into()))?;
        Ok(rx)
    }

    /// Queue a request and return the stream of its events.
    pub async fn submit(&self, request: SimilarityRequest) -> Result<mpsc::UnboundedReceiver<Event>> {
        self.enqueue(request, None).await
    }

    /// Run a request, passing each event to `on_event`, and return the
    /// controller's result with its error variant intact.
    pub async fn compute<F>(&self, request: SimilarityRequest, mut on_event: F) -> Result<f32>
    where
        F: FnMut(&Event),
    {
        let (result_tx, result_rx) = oneshot::channel();
        let mut rx = self.enqueue(request, Some(result_tx)).await?;
        while let Some(event) = rx.recv().await {
            on_event(&event);
            if event.is_terminal() {
                break;
            }
        }

        result_rx.await.map_err(|_| {
            SimilarityError::Worker("worker stopped before the request finished".into())
        })?
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }
}
