//! Configuration-related errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating gateway configuration.
///
/// The gateway fails fast at construction on any of these; security-relevant
/// thresholds are never silently defaulted.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ConfigError {
    /// A required value is absent
    #[error("Missing required config value: {field}")]
    Missing {
        /// Dotted path of the missing field
        field: String,
    },

    /// A value is present but outside its valid range
    #[error("Config validation error for {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field
        field: String,
        /// Description of the validation failure
        message: String,
    },
}

impl ConfigError {
    pub fn missing(field: &str) -> Self {
        Self::Missing { field: field.to_string() }
    }

    pub fn invalid(field: &str, message: &str) -> Self {
        Self::Invalid { field: field.to_string(), message: message.to_string() }
    }
}
