//! Stream event dispatcher: the push-event protocol state machine.
//!
//! Consumes raw frames from the upstream transport, validates and types each
//! one, normalizes provider status vocabulary, advances the session phase
//! machine, and invokes typed callbacks in frame-arrival order.
//!
//! Malformed frames are logged and skipped; they never terminate the session.
//! Terminal phases are absorbing: residual frames after `end`/`error` are
//! discarded with a warning. Callback execution is decoupled from frame
//! ingestion by a bounded channel so a slow callback cannot stall the stream
//! read loop.

mod session;

#[cfg(test)]
mod tests;

pub use session::{SessionOutcome, StreamSession};

use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use fastgate_types::error::GatewayError;
use fastgate_types::protocol::{RawFrame, StatusUpdate, StreamEvent, StreamStatus};

use crate::gateway::upstream::FrameStream;

/// Typed event contract exposed to callers.
///
/// All methods have no-op defaults; implement only what the caller renders.
/// Callbacks run off the ingestion loop and must not block forever, but they
/// may be moderately slow without stalling frame reads.
pub trait StreamCallbacks: Send + Sync {
    fn on_chunk(&self, _text: &str) {}
    fn on_status(&self, _update: &StatusUpdate) {}
    fn on_interactive(&self, _prompt: &Value) {}
    fn on_reasoning(&self, _step: &Value) {}
    fn on_chat_id(&self, _chat_id: &str) {}
    fn on_dataset(&self, _reference: &Value) {}
    fn on_summary(&self, _text: &str) {}
    fn on_tool(&self, _call: &Value) {}
    fn on_usage(&self, _counters: &Value) {}
    fn on_end(&self, _trailing: Option<&Value>) {}
    fn on_error(&self, _error: &GatewayError) {}
}

fn malformed(message: impl Into<String>) -> GatewayError {
    GatewayError::MalformedFrame { message: message.into() }
}

fn string_payload(frame: &RawFrame) -> Result<String, GatewayError> {
    match &frame.payload {
        Value::String(s) => Ok(s.clone()),
        Value::Object(map) => map
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed(format!("`{}` payload missing text", frame.event))),
        _ => Err(malformed(format!("`{}` payload must be a string", frame.event))),
    }
}

fn status_payload(payload: &Value) -> Result<StatusUpdate, GatewayError> {
    let map = payload
        .as_object()
        .ok_or_else(|| malformed("`status` payload must be an object"))?;
    let raw = map
        .get("status")
        .or_else(|| map.get("phase"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| malformed("`status` payload missing status field"))?;

    let mut update = StatusUpdate::new(StreamStatus::from_raw(raw));
    update.module_name = map
        .get("moduleName")
        .or_else(|| map.get("name"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    update.progress_percent = map
        .get("progressPercent")
        .or_else(|| map.get("progress"))
        .and_then(|v| v.as_u64())
        .map(|p| p.min(100) as u8);
    update.error_detail = map
        .get("errorDetail")
        .or_else(|| map.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Ok(update)
}

fn error_payload(payload: &Value) -> (String, String) {
    match payload {
        Value::String(message) => ("upstream_error".to_string(), message.clone()),
        Value::Object(map) => {
            let code = map
                .get("code")
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "upstream_error".to_string());
            let message = map
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unspecified upstream error")
                .to_string();
            (code, message)
        },
        _ => ("upstream_error".to_string(), "unspecified upstream error".to_string()),
    }
}

/// Resolve a raw frame into the internal event taxonomy.
///
/// The raw tag table is the only place provider event names appear.
pub fn resolve_frame(frame: &RawFrame) -> Result<StreamEvent, GatewayError> {
    match frame.event.as_str() {
        "chunk" => Ok(StreamEvent::Chunk(string_payload(frame)?)),
        "status" => Ok(StreamEvent::Status(status_payload(&frame.payload)?)),
        "interactive" => match &frame.payload {
            Value::Object(_) => Ok(StreamEvent::Interactive(frame.payload.clone())),
            _ => Err(malformed("`interactive` payload must be an object")),
        },
        "reasoning" => match &frame.payload {
            Value::Object(_) | Value::Array(_) => Ok(StreamEvent::Reasoning(frame.payload.clone())),
            _ => Err(malformed("`reasoning` payload must be structured")),
        },
        "chatId" => Ok(StreamEvent::ChatId(string_payload(frame)?)),
        "dataset" => match &frame.payload {
            Value::Object(_) | Value::Array(_) => Ok(StreamEvent::Dataset(frame.payload.clone())),
            _ => Err(malformed("`dataset` payload must be structured")),
        },
        "summary" => Ok(StreamEvent::Summary(string_payload(frame)?)),
        "tool" => match &frame.payload {
            Value::Object(_) => Ok(StreamEvent::Tool(frame.payload.clone())),
            _ => Err(malformed("`tool` payload must be an object")),
        },
        "usage" => match &frame.payload {
            Value::Object(_) => Ok(StreamEvent::Usage(frame.payload.clone())),
            _ => Err(malformed("`usage` payload must be an object")),
        },
        "end" => Ok(StreamEvent::End(match &frame.payload {
            Value::Null => None,
            other => Some(other.clone()),
        })),
        "error" => {
            let (code, message) = error_payload(&frame.payload);
            Ok(StreamEvent::Error { code, message })
        },
        other => Err(malformed(format!("unrecognized event type `{other}`"))),
    }
}

enum CallbackMsg {
    Event(StreamEvent),
    Failure(GatewayError),
}

fn invoke(callbacks: &dyn StreamCallbacks, msg: &CallbackMsg) {
    match msg {
        CallbackMsg::Event(event) => match event {
            StreamEvent::Chunk(text) => callbacks.on_chunk(text),
            StreamEvent::Status(update) => callbacks.on_status(update),
            StreamEvent::Interactive(prompt) => callbacks.on_interactive(prompt),
            StreamEvent::Reasoning(step) => callbacks.on_reasoning(step),
            StreamEvent::ChatId(id) => callbacks.on_chat_id(id),
            StreamEvent::Dataset(reference) => callbacks.on_dataset(reference),
            StreamEvent::Summary(text) => callbacks.on_summary(text),
            StreamEvent::Tool(call) => callbacks.on_tool(call),
            StreamEvent::Usage(counters) => callbacks.on_usage(counters),
            StreamEvent::End(trailing) => callbacks.on_end(trailing.as_ref()),
            StreamEvent::Error { code, message } => {
                callbacks.on_error(&GatewayError::UpstreamProtocol {
                    code: code.clone(),
                    message: message.clone(),
                });
            },
        },
        CallbackMsg::Failure(error) => callbacks.on_error(error),
    }
}

/// State machine for one logical chat turn.
pub struct StreamDispatcher {
    session: StreamSession,
}

impl StreamDispatcher {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session: StreamSession::new(session_id) }
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Feed one frame through validation, typing, and the phase machine.
    ///
    /// Returns the typed event to forward, or `None` when the frame was
    /// skipped (malformed) or discarded (session already terminal).
    pub fn feed(&mut self, frame: &RawFrame) -> Option<StreamEvent> {
        if self.session.is_terminal() {
            warn!(
                session_id = %self.session.session_id,
                event = %frame.event,
                "discarding residual frame after terminal phase"
            );
            return None;
        }

        match resolve_frame(frame) {
            Ok(event) => {
                self.session.apply(&event);
                Some(event)
            },
            Err(err) => {
                warn!(
                    session_id = %self.session.session_id,
                    event = %frame.event,
                    %err,
                    "skipping malformed frame"
                );
                None
            },
        }
    }

    /// Drive the whole stream to completion.
    ///
    /// Frame ingestion and callback execution are decoupled by a bounded
    /// channel of `buffer` messages; callbacks run on their own task, in
    /// frame order. The returned error is the session's terminal cause and
    /// has already been surfaced exactly once via `on_error`.
    pub async fn run(
        mut self,
        mut frames: FrameStream,
        callbacks: Arc<dyn StreamCallbacks>,
        buffer: usize,
    ) -> (StreamSession, Result<(), GatewayError>) {
        let (tx, mut rx) = mpsc::channel::<CallbackMsg>(buffer.max(1));
        let callback_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                invoke(callbacks.as_ref(), &msg);
            }
        });

        let mut terminal: Result<(), GatewayError> = Ok(());

        while let Some(item) = frames.next().await {
            match item {
                Ok(frame) => {
                    let Some(event) = self.feed(&frame) else {
                        continue;
                    };
                    if let StreamEvent::Error { code, message } = &event {
                        terminal = Err(GatewayError::UpstreamProtocol {
                            code: code.clone(),
                            message: message.clone(),
                        });
                    }
                    if tx.send(CallbackMsg::Event(event)).await.is_err() {
                        break;
                    }
                },
                Err(err) => {
                    if !self.session.is_terminal() {
                        debug!(
                            session_id = %self.session.session_id,
                            %err,
                            "transport failure before terminal frame"
                        );
                        self.session.fail();
                        terminal = Err(err.clone());
                        let _ = tx.send(CallbackMsg::Failure(err)).await;
                    }
                    break;
                },
            }
        }

        // Stream ended without end/error: a disconnection, distinct from an
        // explicit upstream error frame.
        if !self.session.is_terminal() {
            self.session.fail();
            let err = GatewayError::IncompleteStream;
            terminal = Err(err.clone());
            let _ = tx.send(CallbackMsg::Failure(err)).await;
        }

        drop(tx);
        let _ = callback_task.await;

        (self.session, terminal)
    }
}
