//! Typed error definitions for fastgate.
//!
//! All errors are designed to be:
//!
//! - **Serializable** for API responses via serde
//! - **Displayable** for logging via Display trait
//! - **Matchable** for error handling logic via enum variants
//! - **Composable** via thiserror derive macros

mod config;
mod gateway;

pub use config::ConfigError;
pub use gateway::GatewayError;

/// Standard Result type using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::ScopeType;

    #[test]
    fn test_error_serialization_roundtrip() {
        let err = GatewayError::AdmissionRejected {
            scope: ScopeType::User,
            retry_after_ms: 1500,
        };

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("AdmissionRejected"));

        let deserialized: GatewayError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, deserialized);
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::CircuitOpenRejected {
            target: "fastgpt-eu".to_string(),
            retry_after_ms: 30_000,
        };

        let msg = format!("{}", err);
        assert!(msg.contains("fastgpt-eu"));
        assert!(msg.contains("30000"));
    }
}
