//! Circuit breaker state types.

use std::time::Instant;

/// State of one upstream target's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Target is failing - calls fail immediately
    Open,
    /// Testing recovery - exactly one probe call allowed
    HalfOpen,
}

/// State transition reported back to the orchestrator so it can emit
/// lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    Opened,
    Closed,
}

/// Per-target circuit state. Mutated only through the registry's
/// transition rules.
#[derive(Debug)]
pub(super) struct TargetCircuit {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub probe_in_flight: bool,
    /// Consecutive re-opens without recovery; drives exponential cooldown
    pub reopen_count: u32,
    pub last_failure_reason: Option<String>,
}

impl Default for TargetCircuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            reopen_count: 0,
            last_failure_reason: None,
        }
    }
}

/// Aggregate snapshot across all targets, for operational introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSummary {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub total_trips: u64,
}
