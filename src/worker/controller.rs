//! Per-request orchestration: acquire the model, embed both sides, score.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};

use super::protocol::{Event, SimilarityRequest};
use crate::aggregate;
use crate::chunker::{self, UNBOUNDED};
use crate::error::{Result, SimilarityError};
use crate::fetch::ImageFetcher;
use crate::model::{ModelProvider, ModelSource, ProgressEvent, ProgressSink};
use crate::vector;

/// Channel carrying the events of one request.
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Where the controller is in the lifecycle of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Initializing,
    Loading,
    Ready,
    Computing,
    Done,
    Error,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::Initializing => "initializing",
            ControllerState::Loading => "loading",
            ControllerState::Ready => "ready",
            ControllerState::Computing => "computing",
            ControllerState::Done => "done",
            ControllerState::Error => "error",
        };
        f.write_str(name)
    }
}

/// How text is fitted to the encoder window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Encoder token window, special tokens included.
    pub window: usize,
    /// Split long text into windows and pool; otherwise truncate.
    pub chunking: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window: 77,
            chunking: true,
        }
    }
}

impl PipelineSettings {
    /// Content tokens per chunk, leaving room for the framing tokens.
    pub fn chunk_tokens(&self, special_tokens: usize) -> usize {
        if self.chunking {
            self.window.saturating_sub(special_tokens).max(1)
        } else {
            UNBOUNDED
        }
    }
}

/// Runs requests against a shared [`ModelProvider`], one at a time.
pub struct RequestController {
    provider: Arc<ModelProvider>,
    source: ModelSource,
    settings: PipelineSettings,
    fetcher: ImageFetcher,
    state: watch::Sender<ControllerState>,
}

impl RequestController {
    pub fn new(
        provider: Arc<ModelProvider>,
        source: ModelSource,
        settings: PipelineSettings,
        fetcher: ImageFetcher,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Idle);
        Self {
            provider,
            source,
            settings,
            fetcher,
            state,
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ControllerState) {
        let prev = self.state.send_replace(next);
        tracing::trace!(from = %prev, to = %next, "Controller state");
    }

    /// Run one request to completion, emitting its events on `events`.
    ///
    /// Exactly one terminal event (`complete` or `error`) is sent. The
    /// controller is back in `Idle` when this returns.
    pub async fn handle(&self, request: SimilarityRequest, events: &EventSender) -> Result<f32> {
        let started = Instant::now();
        self.transition(ControllerState::Initializing);
        let _ = events.send(Event::Initiate);

        let result = self.run(request, events).await;

        match &result {
            Ok(score) => {
                self.transition(ControllerState::Done);
                tracing::info!(
                    score = *score,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Similarity computed"
                );
                let _ = events.send(Event::Complete { output: *score });
            }
            Err(e) => {
                self.transition(ControllerState::Error);
                tracing::warn!(kind = e.kind(), error = %e, "Similarity request failed");
                let _ = events.send(Event::Error {
                    error: e.to_string(),
                });
            }
        }

        self.transition(ControllerState::Idle);
        result
    }

    async fn run(&self, request: SimilarityRequest, events: &EventSender) -> Result<f32> {
        validate(&request)?;

        if !self.provider.is_ready() {
            self.transition(ControllerState::Loading);
        }
        let bundle = self
            .provider
            .acquire(&self.source, progress_forwarder(events))
            .await?;

        self.transition(ControllerState::Ready);
        let _ = events.send(Event::Ready);

        self.transition(ControllerState::Computing);
        let window = self.settings.window;
        let max_tokens = self
            .settings
            .chunk_tokens(bundle.tokenizer().special_token_count());

        let text_bundle = Arc::clone(&bundle);
        let text = request.text;
        let text_branch = tokio::task::spawn_blocking(move || {
            let tokenizer = text_bundle.tokenizer().as_ref();
            let chunks = chunker::split(&text, tokenizer, max_tokens)?;
            aggregate::embed_text(&chunks, tokenizer, text_bundle.text_encoder().as_ref(), window)
        });

        let image_bundle = Arc::clone(&bundle);
        let fetcher = self.fetcher.clone();
        let url = request.url;
        let image_branch = tokio::task::spawn_blocking(move || {
            let bytes = fetcher.fetch(&url)?;
            aggregate::embed_image(
                &bytes,
                image_bundle.preprocessor().as_ref(),
                image_bundle.image_encoder().as_ref(),
            )
        });

        let (text_embedding, image_embedding) = tokio::join!(text_branch, image_branch);
        let text_embedding = text_embedding??;
        let image_embedding = image_embedding??;

        vector::cosine_similarity(text_embedding.as_slice(), image_embedding.as_slice())
    }
}

fn validate(request: &SimilarityRequest) -> Result<()> {
    if request.text.trim().is_empty() {
        return Err(SimilarityError::EmptyInput("text is empty".into()));
    }
    if request.url.trim().is_empty() {
        return Err(SimilarityError::EmptyInput("image url is empty".into()));
    }
    Ok(())
}

/// Relay determinate load progress as protocol events.
fn progress_forwarder(events: &EventSender) -> ProgressSink {
    let events = events.clone();
    Arc::new(move |progress: ProgressEvent| {
        if progress.is_determinate() {
            let _ = events.send(Event::Progress { progress });
        }
    })
}
