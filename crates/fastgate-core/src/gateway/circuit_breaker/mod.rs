//! Per-target circuit breaking for upstream calls.
//!
//! When a target accumulates `failure_threshold` consecutive failures its
//! circuit opens and calls fail fast with no upstream I/O. After the cooldown
//! the circuit goes half-open and admits exactly one probe; the first probe
//! success closes it, a probe failure re-opens with an exponentially longer
//! cooldown.
//!
//! States:
//! - Closed: normal operation, calls pass through
//! - Open: target is failing, calls rejected immediately
//! - Half-Open: one probe in flight, concurrent arrivals rejected fast

mod state;


use state::TargetCircuit;
pub use state::{CircuitState, CircuitSummary, CircuitTransition};

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use fastgate_types::config::CircuitBreakerConfig;
use fastgate_types::error::GatewayError;

struct BreakerInner {
    config: CircuitBreakerConfig,
    // Sharded map: transitions for one target serialize on its entry,
    // unrelated targets never contend on a shared lock.
    targets: DashMap<String, TargetCircuit>,
    total_trips: AtomicU64,
}

/// Registry of per-target circuits. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

/// Permission to make one upstream call, handed out by [`CircuitBreaker::acquire`].
///
/// The holder must resolve the permit with [`success`](CircuitPermit::success)
/// or [`failure`](CircuitPermit::failure). A probe permit dropped unresolved
/// (caller cancelled mid-probe) releases the probe gate so the next arrival
/// can probe instead of deadlocking the half-open state.
#[must_use = "resolve the permit with success() or failure()"]
pub struct CircuitPermit {
    breaker: CircuitBreaker,
    target: String,
    is_probe: bool,
    resolved: bool,
}

impl std::fmt::Debug for CircuitPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitPermit")
            .field("target", &self.target)
            .field("is_probe", &self.is_probe)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(BreakerInner {
                config,
                targets: DashMap::new(),
                total_trips: AtomicU64::new(0),
            }),
        }
    }

    /// Cooldown for a circuit that has re-opened `reopen_count` times.
    fn cooldown(&self, reopen_count: u32) -> Duration {
        let base = self.inner.config.open_duration_ms;
        let ms = base
            .saturating_mul(2_u64.saturating_pow(reopen_count))
            .min(self.inner.config.max_open_duration_ms);
        Duration::from_millis(ms)
    }

    /// Gate one call against the target's circuit.
    ///
    /// Returns a permit when the call may proceed, or
    /// [`GatewayError::CircuitOpenRejected`] with the remaining cooldown.
    pub fn acquire(&self, target: &str) -> Result<CircuitPermit, GatewayError> {
        let mut circuit = self.inner.targets.entry(target.to_string()).or_default();

        match circuit.state {
            CircuitState::Closed => Ok(self.permit(target, false)),
            CircuitState::Open => {
                let cooldown = self.cooldown(circuit.reopen_count);
                let elapsed = circuit.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
                if elapsed >= cooldown {
                    debug!(target, "circuit half-open, admitting probe");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    return Ok(self.permit(target, true));
                }
                let remaining = cooldown.saturating_sub(elapsed);
                Err(GatewayError::CircuitOpenRejected {
                    target: target.to_string(),
                    retry_after_ms: (remaining.as_millis() as u64).max(1),
                })
            },
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    return Err(GatewayError::CircuitOpenRejected {
                        target: target.to_string(),
                        retry_after_ms: self.inner.config.open_duration_ms,
                    });
                }
                circuit.probe_in_flight = true;
                Ok(self.permit(target, true))
            },
        }
    }

    fn permit(&self, target: &str, is_probe: bool) -> CircuitPermit {
        CircuitPermit {
            breaker: self.clone(),
            target: target.to_string(),
            is_probe,
            resolved: false,
        }
    }

    fn record_success(&self, target: &str) -> Option<CircuitTransition> {
        let mut circuit = self.inner.targets.entry(target.to_string()).or_default();

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
                None
            },
            CircuitState::HalfOpen => {
                info!(target, "circuit closing, target recovered");
                circuit.state = CircuitState::Closed;
                circuit.consecutive_failures = 0;
                circuit.reopen_count = 0;
                circuit.probe_in_flight = false;
                circuit.opened_at = None;
                circuit.last_failure_reason = None;
                Some(CircuitTransition::Closed)
            },
            CircuitState::Open => {
                debug!(target, "unexpected success while open");
                None
            },
        }
    }

    fn record_failure(&self, target: &str, reason: &str) -> Option<CircuitTransition> {
        let mut circuit = self.inner.targets.entry(target.to_string()).or_default();

        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        circuit.last_failure_reason = Some(reason.to_string());

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures >= self.inner.config.failure_threshold {
                    warn!(
                        target,
                        failures = circuit.consecutive_failures,
                        reason,
                        "circuit opening, too many consecutive failures"
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                    self.inner.total_trips.fetch_add(1, Ordering::Relaxed);
                    return Some(CircuitTransition::Opened);
                }
                None
            },
            CircuitState::HalfOpen => {
                warn!(target, reason, "probe failed, circuit re-opening");
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.reopen_count = circuit.reopen_count.saturating_add(1);
                circuit.probe_in_flight = false;
                self.inner.total_trips.fetch_add(1, Ordering::Relaxed);
                Some(CircuitTransition::Opened)
            },
            // Another permit already opened the circuit; nothing further.
            CircuitState::Open => None,
        }
    }

    fn release_probe(&self, target: &str) {
        if let Some(mut circuit) = self.inner.targets.get_mut(target) {
            if circuit.state == CircuitState::HalfOpen {
                debug!(target, "probe abandoned, releasing gate");
                circuit.probe_in_flight = false;
            }
        }
    }

    pub fn state(&self, target: &str) -> CircuitState {
        self.inner
            .targets
            .get(target)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn summary(&self) -> CircuitSummary {
        let mut summary = CircuitSummary {
            closed: 0,
            open: 0,
            half_open: 0,
            total_trips: self.inner.total_trips.load(Ordering::Relaxed),
        };
        for circuit in self.inner.targets.iter() {
            match circuit.state {
                CircuitState::Closed => summary.closed += 1,
                CircuitState::Open => summary.open += 1,
                CircuitState::HalfOpen => summary.half_open += 1,
            }
        }
        summary
    }
}

impl CircuitPermit {
    /// The call succeeded; closes the circuit if this was a probe.
    pub fn success(mut self) -> Option<CircuitTransition> {
        self.resolved = true;
        self.breaker.record_success(&self.target)
    }

    /// The call failed; may open (or re-open) the circuit.
    pub fn failure(mut self, reason: &str) -> Option<CircuitTransition> {
        self.resolved = true;
        self.breaker.record_failure(&self.target, reason)
    }

    pub fn is_probe(&self) -> bool {
        self.is_probe
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.resolved && self.is_probe {
            self.breaker.release_probe(&self.target);
        }
    }
}
