//! Status vocabulary normalization.

use serde::{Deserialize, Serialize};

/// Internal status vocabulary handed to callbacks.
///
/// Provider status strings are mapped through [`StreamStatus::from_raw`]
/// before they reach application code. Unrecognized values become
/// [`StreamStatus::Unknown`] with the raw string preserved for observability;
/// they are forwarded, never treated as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "raw", rename_all = "snake_case")]
pub enum StreamStatus {
    /// A workflow node is executing
    Running,
    /// Incremental progress report
    Progress,
    /// The reported unit of work finished successfully
    Completed,
    /// The reported unit of work failed
    Errored,
    /// Provider value outside the known mapping table (raw value preserved)
    Unknown(String),
}

impl StreamStatus {
    /// Normalize a provider status string into the internal vocabulary.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "running" | "flowNodeStatus" => Self::Running,
            "progress" => Self::Progress,
            "complete" | "completed" | "finish" => Self::Completed,
            "error" | "failed" => Self::Errored,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The raw provider value, only present for unknown statuses.
    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::Unknown(raw) => Some(raw),
            _ => None,
        }
    }
}

/// Payload of a `status` frame after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: StreamStatus,
    /// Workflow module currently executing, when the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: StreamStatus) -> Self {
        Self { status, module_name: None, progress_percent: None, error_detail: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vocabulary_maps() {
        assert_eq!(StreamStatus::from_raw("running"), StreamStatus::Running);
        assert_eq!(StreamStatus::from_raw("flowNodeStatus"), StreamStatus::Running);
        assert_eq!(StreamStatus::from_raw("progress"), StreamStatus::Progress);
        assert_eq!(StreamStatus::from_raw("complete"), StreamStatus::Completed);
        assert_eq!(StreamStatus::from_raw("completed"), StreamStatus::Completed);
        assert_eq!(StreamStatus::from_raw("error"), StreamStatus::Errored);
    }

    #[test]
    fn test_unknown_preserves_raw_value() {
        let status = StreamStatus::from_raw("warmingUp");
        assert_eq!(status, StreamStatus::Unknown("warmingUp".to_string()));
        assert_eq!(status.raw(), Some("warmingUp"));
        assert_eq!(StreamStatus::Running.raw(), None);
    }
}
