//! Upstream push-event protocol vocabulary.
//!
//! The upstream transport delivers an ordered sequence of tagged frames
//! ([`RawFrame`]). The dispatcher in `fastgate-core` validates each frame and
//! resolves it into the internal [`StreamEvent`] taxonomy; provider-specific
//! status strings are normalized into [`StreamStatus`] here so that callback
//! code never sees provider vocabulary.

mod frame;
mod status;

pub use frame::{RawFrame, StreamEvent};
pub use status::{StatusUpdate, StreamStatus};

use serde::{Deserialize, Serialize};

/// Scope under which a rate-limit window is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    /// Client IP address
    Ip,
    /// Authenticated user
    User,
    /// Logical endpoint (e.g. chat completion route)
    Endpoint,
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ip => write!(f, "ip"),
            Self::User => write!(f, "user"),
            Self::Endpoint => write!(f, "endpoint"),
        }
    }
}

/// Phase of one logical chat turn.
///
/// `Completed` and `Failed` are absorbing: once reached, residual frames are
/// discarded with a warning and never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Stream opened, no content frame seen yet
    Opened,
    /// Content or status frames flowing
    Streaming,
    /// Upstream asked for mid-stream user input
    AwaitingInteractive,
    /// Terminal success (`end` frame)
    Completed,
    /// Terminal failure (`error` frame or transport loss)
    Failed,
}

impl SessionPhase {
    /// Check if the session accepts no further frames.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
