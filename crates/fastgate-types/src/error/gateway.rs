//! Gateway operation errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::ScopeType;

/// Errors that can occur while proxying a chat request through the gateway.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum GatewayError {
    /// Rate limiter refused admission for one of the configured scopes
    #[error("Admission rejected for {scope} scope, retry after {retry_after_ms}ms")]
    AdmissionRejected {
        scope: ScopeType,
        retry_after_ms: u64,
    },

    /// Circuit breaker for the upstream target is open
    #[error("Circuit open for {target}, retry after {retry_after_ms}ms")]
    CircuitOpenRejected {
        target: String,
        retry_after_ms: u64,
    },

    /// Transport-level failure (connect error, mid-stream disconnect, timeout)
    #[error("Upstream transport failure: {message}")]
    UpstreamTransport { message: String },

    /// Upstream stream closed before a terminal `end`/`error` frame arrived
    #[error("Upstream stream ended without a terminal frame")]
    IncompleteStream,

    /// Explicit `error` frame received from the upstream
    #[error("Upstream protocol error {code}: {message}")]
    UpstreamProtocol { code: String, message: String },

    /// All retry attempts consumed without success
    #[error("Retry exhausted after {attempts} attempts: {last_cause}")]
    RetryExhausted {
        attempts: u32,
        last_cause: Box<GatewayError>,
    },

    /// A push frame could not be parsed (recovered locally, never terminal)
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    /// Frames fed to a session that already reached Completed/Failed
    #[error("Session {session_id} is already terminal")]
    SessionTerminal { session_id: String },

    /// Request validation failed before any upstream work
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Internal gateway error (bugs, unexpected states)
    #[error("Internal gateway error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Stable machine-readable code for this error, for caller dispatch.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AdmissionRejected { .. } => "admission_rejected",
            Self::CircuitOpenRejected { .. } => "circuit_open",
            Self::UpstreamTransport { .. } => "upstream_transport",
            Self::IncompleteStream => "incomplete_stream",
            Self::UpstreamProtocol { .. } => "upstream_protocol",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::MalformedFrame { .. } => "malformed_frame",
            Self::SessionTerminal { .. } => "session_terminal",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Internal { .. } => "internal",
        }
    }

    /// Suggested wait before retrying, for the two admission-style rejections.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::AdmissionRejected { retry_after_ms, .. }
            | Self::CircuitOpenRejected { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Check if a fresh attempt against the upstream could succeed.
    ///
    /// Admission and circuit rejections are deliberately non-retryable within
    /// a single retry loop: retrying them would hammer a gate that already
    /// said no.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTransport { .. } | Self::IncompleteStream
        )
    }

    /// Check if this error should count toward circuit breaker failure accounting.
    pub fn should_trip_circuit(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTransport { .. }
                | Self::IncompleteStream
                | Self::UpstreamProtocol { .. }
                | Self::RetryExhausted { .. }
        )
    }

    /// Check if this is a client-side error (no upstream involvement).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. } | Self::SessionTerminal { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            GatewayError::AdmissionRejected {
                scope: ScopeType::Ip,
                retry_after_ms: 100
            }
            .error_code(),
            "admission_rejected"
        );
        assert_eq!(GatewayError::IncompleteStream.error_code(), "incomplete_stream");
    }

    #[test]
    fn test_retry_after_hint() {
        let rejected = GatewayError::AdmissionRejected {
            scope: ScopeType::Endpoint,
            retry_after_ms: 250,
        };
        assert_eq!(rejected.retry_after_ms(), Some(250));

        let protocol = GatewayError::UpstreamProtocol {
            code: "E42".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(protocol.retry_after_ms(), None);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GatewayError::IncompleteStream.is_retryable());
        assert!(GatewayError::UpstreamTransport { message: "reset".into() }.is_retryable());
        assert!(!GatewayError::InvalidRequest { message: "bad".into() }.is_retryable());
        assert!(!GatewayError::CircuitOpenRejected {
            target: "t".into(),
            retry_after_ms: 1
        }
        .is_retryable());
    }

    #[test]
    fn test_circuit_accounting_excludes_rejections() {
        let open = GatewayError::CircuitOpenRejected {
            target: "t".into(),
            retry_after_ms: 1,
        };
        assert!(!open.should_trip_circuit());
        assert!(GatewayError::IncompleteStream.should_trip_circuit());
    }
}
