//! Lifecycle events carried by the internal work queue.
//!
//! Monitoring/alerting collaborators subscribe to these; the gateway core only
//! produces them. Listeners observe copies, never the queued value itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ScopeType;

/// Gateway lifecycle event types, one queue stream per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Admitted,
    Rejected,
    CircuitOpened,
    CircuitClosed,
    RetryExhausted,
    SessionCompleted,
    SessionFailed,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Admitted => "admitted",
            Self::Rejected => "rejected",
            Self::CircuitOpened => "circuit_opened",
            Self::CircuitClosed => "circuit_closed",
            Self::RetryExhausted => "retry_exhausted",
            Self::SessionCompleted => "session_completed",
            Self::SessionFailed => "session_failed",
        };
        write!(f, "{name}")
    }
}

/// One queued event: type tag, self-describing payload, enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub event_type: LifecycleEvent,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(event_type: LifecycleEvent, payload: Value) -> Self {
        Self { event_type, payload, enqueued_at: Utc::now() }
    }

    /// Rejection event with the blocking scope and wait hint.
    pub fn rejected(scope: ScopeType, retry_after_ms: u64) -> Self {
        Self::new(
            LifecycleEvent::Rejected,
            serde_json::json!({ "scope": scope, "retry_after_ms": retry_after_ms }),
        )
    }
}
