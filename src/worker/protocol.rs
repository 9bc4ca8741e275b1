//! Messages exchanged with a similarity worker.
//!
//! Requests carry the text and image location; events report the lifecycle
//! of one request and are serialized as JSON objects tagged by `status`.

use serde::{Deserialize, Serialize};

use crate::model::ProgressEvent;

/// A single scoring request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityRequest {
    pub text: String,
    pub url: String,
}

impl SimilarityRequest {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }
}

/// Lifecycle event of a request.
///
/// Per request the order is `initiate, progress*, ready, complete` on
/// success; an `error` ends the request at any point after `initiate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Event {
    Initiate,
    Progress { progress: ProgressEvent },
    Ready,
    Complete { output: f32 },
    Error { error: String },
}

impl Event {
    /// Protocol tag of the event.
    pub fn status(&self) -> &'static str {
        match self {
            Event::Initiate => "initiate",
            Event::Progress { .. } => "progress",
            Event::Ready => "ready",
            Event::Complete { .. } => "complete",
            Event::Error { .. } => "error",
        }
    }

    /// Whether this event ends its request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Complete { .. } | Event::Error { .. })
    }
}
