//! Raw frames and the typed internal event taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::StatusUpdate;

/// One frame as delivered by the upstream transport: an event-type tag plus
/// an opaque JSON payload. Validation and typing happen in the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    pub event: String,
    pub payload: Value,
}

impl RawFrame {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self { event: event.into(), payload }
    }
}

/// Internal event taxonomy after frame resolution.
///
/// This is the vocabulary callbacks receive; the raw tag set
/// (`chunk`/`status`/`interactive`/…) never leaks past the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text
    Chunk(String),
    /// Lifecycle/progress update, status already normalized
    Status(StatusUpdate),
    /// Mid-stream user input required (structured prompt descriptor)
    Interactive(Value),
    /// Intermediate reasoning trace
    Reasoning(Value),
    /// Server-assigned conversation identifier
    ChatId(String),
    /// Retrieval/citation reference
    Dataset(Value),
    /// Running summary text
    Summary(String),
    /// Tool-invocation record
    Tool(Value),
    /// Token/cost accounting counters
    Usage(Value),
    /// Terminal success, optional trailing payload
    End(Option<Value>),
    /// Terminal failure reported by the upstream
    Error { code: String, message: String },
}

impl StreamEvent {
    /// Check if this event terminates the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End(_) | Self::Error { .. })
    }
}
