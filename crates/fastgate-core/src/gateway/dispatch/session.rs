//! Per-turn session state.

use serde_json::Value;
use std::time::Instant;

use fastgate_types::protocol::{SessionPhase, StreamEvent};

/// Mutable state for one logical chat turn, advanced by every parsed frame.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub session_id: String,
    /// Server-assigned conversation id; set once, may arrive mid-stream
    pub chat_id: Option<String>,
    pub phase: SessionPhase,
    pub accumulated_text: String,
    /// Trailing payload of the terminal `end` frame, when one was attached
    pub end_payload: Option<Value>,
    pub last_event_at: Option<Instant>,
}

impl StreamSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            chat_id: None,
            phase: SessionPhase::Opened,
            accumulated_text: String::new(),
            end_payload: None,
            last_event_at: None,
        }
    }

    /// Advance the phase machine for one event.
    ///
    /// ```text
    /// Opened --(chunk|status)--> Streaming --(interactive)--> AwaitingInteractive
    ///   AwaitingInteractive --(resumed frame)--> Streaming
    ///   any --(end)--> Completed      any --(error)--> Failed
    /// ```
    ///
    /// `chat_id` assignment does not itself cause a transition. The caller
    /// checks for terminal phases before feeding events; this method assumes
    /// the session is live.
    pub fn apply(&mut self, event: &StreamEvent) {
        self.last_event_at = Some(Instant::now());

        match event {
            StreamEvent::ChatId(id) => {
                // First assignment wins; upstreams re-sending the id mid-turn
                // must not flip an established conversation.
                if self.chat_id.is_none() {
                    self.chat_id = Some(id.clone());
                }
            },
            StreamEvent::Chunk(text) => {
                self.accumulated_text.push_str(text);
                self.resume();
            },
            StreamEvent::Interactive(_) => {
                self.phase = SessionPhase::AwaitingInteractive;
            },
            StreamEvent::End(trailing) => {
                self.end_payload = trailing.clone();
                self.phase = SessionPhase::Completed;
            },
            StreamEvent::Error { .. } => {
                self.phase = SessionPhase::Failed;
            },
            StreamEvent::Status(_)
            | StreamEvent::Reasoning(_)
            | StreamEvent::Dataset(_)
            | StreamEvent::Summary(_)
            | StreamEvent::Tool(_)
            | StreamEvent::Usage(_) => {
                self.resume();
            },
        }
    }

    /// Transport failed or the stream ended without a terminal frame.
    pub fn fail(&mut self) {
        self.phase = SessionPhase::Failed;
        self.last_event_at = Some(Instant::now());
    }

    fn resume(&mut self) {
        match self.phase {
            SessionPhase::Opened | SessionPhase::AwaitingInteractive => {
                self.phase = SessionPhase::Streaming;
            },
            _ => {},
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Immutable outcome of a finished (or failed) turn, shared with every
/// deduplicated waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub chat_id: Option<String>,
    pub phase: SessionPhase,
    pub accumulated_text: String,
    pub end_payload: Option<Value>,
}

impl From<&StreamSession> for SessionOutcome {
    fn from(session: &StreamSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            chat_id: session.chat_id.clone(),
            phase: session.phase,
            accumulated_text: session.accumulated_text.clone(),
            end_payload: session.end_payload.clone(),
        }
    }
}
