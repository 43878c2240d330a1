//! Gateway configuration types.
//!
//! Configuration is supplied by the embedding application at construction
//! time; the gateway calls [`GatewayConfig::validate`] and fails fast if any
//! required threshold is absent or zero. Security-relevant limits are never
//! silently defaulted at runtime — the `Default` impls here exist for tests
//! and for explicit opt-in by the embedder.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol::ScopeType;

/// What the rate limiter does when a scope's window state is unavailable.
///
/// Default is fail-closed (reject) to protect upstreams; fail-open is an
/// explicit trade-off the embedder must opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    FailClosed,
    FailOpen,
}

/// Sliding-window limit for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeLimit {
    /// Maximum admissions within one window
    pub limit: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

/// Rate limiter configuration: one independent limit per configured scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Per-scope limits; a scope without an entry is not checked
    pub scopes: HashMap<ScopeType, ScopeLimit>,
    /// Idle windows older than this are swept
    #[serde(default = "default_idle_ttl_ms")]
    pub idle_ttl_ms: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_idle_ttl_ms() -> u64 {
    300_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(ScopeType::Ip, ScopeLimit { limit: 120, window_ms: 60_000 });
        scopes.insert(ScopeType::User, ScopeLimit { limit: 60, window_ms: 60_000 });
        scopes.insert(ScopeType::Endpoint, ScopeLimit { limit: 600, window_ms: 60_000 });
        Self {
            scopes,
            idle_ttl_ms: default_idle_ttl_ms(),
            failure_policy: FailurePolicy::FailClosed,
        }
    }
}

/// Circuit breaker thresholds and durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Base cooldown before probing, in milliseconds
    pub open_duration_ms: u64,
    /// Ceiling for the exponentially increased cooldown after repeated re-opens
    #[serde(default = "default_max_open_ms")]
    pub max_open_duration_ms: u64,
}

fn default_max_open_ms() -> u64 {
    300_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
            max_open_duration_ms: default_max_open_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }

    pub fn max_open_duration(&self) -> Duration {
        Duration::from_millis(self.max_open_duration_ms)
    }
}

/// Retry policy parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total upstream invocations allowed for one logical call
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub cap_delay_ms: u64,
    /// Jitter span in milliseconds, applied as ± around the computed delay
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_jitter_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 200, cap_delay_ms: 5_000, jitter_ms: 100 }
    }
}

/// Work queue capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Bounded depth per event type; overflow is rejected and counted
    pub capacity_per_type: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity_per_type: 1024 }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
    /// Ceiling for one upstream call, in milliseconds
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    /// Bounded handoff depth between frame ingestion and callback execution
    #[serde(default = "default_dispatch_buffer")]
    pub dispatch_buffer: usize,
}

fn default_upstream_timeout_ms() -> u64 {
    120_000
}

fn default_dispatch_buffer() -> usize {
    64
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            dispatch_buffer: default_dispatch_buffer(),
        }
    }
}

impl GatewayConfig {
    /// Fail-fast validation of every required threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.scopes.is_empty() {
            return Err(ConfigError::missing("rate_limit.scopes"));
        }
        for (scope, limit) in &self.rate_limit.scopes {
            if limit.limit == 0 {
                return Err(ConfigError::invalid(
                    &format!("rate_limit.scopes.{scope}.limit"),
                    "must be greater than zero",
                ));
            }
            if limit.window_ms == 0 {
                return Err(ConfigError::invalid(
                    &format!("rate_limit.scopes.{scope}.window_ms"),
                    "must be greater than zero",
                ));
            }
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                "must be greater than zero",
            ));
        }
        if self.circuit_breaker.open_duration_ms == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.open_duration_ms",
                "must be greater than zero",
            ));
        }
        if self.circuit_breaker.max_open_duration_ms < self.circuit_breaker.open_duration_ms {
            return Err(ConfigError::invalid(
                "circuit_breaker.max_open_duration_ms",
                "must be at least open_duration_ms",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be greater than zero"));
        }
        if self.retry.cap_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::invalid(
                "retry.cap_delay_ms",
                "must be at least base_delay_ms",
            ));
        }
        if self.queue.capacity_per_type == 0 {
            return Err(ConfigError::invalid(
                "queue.capacity_per_type",
                "must be greater than zero",
            ));
        }
        if self.upstream_timeout_ms == 0 {
            return Err(ConfigError::invalid("upstream_timeout_ms", "must be greater than zero"));
        }
        if self.dispatch_buffer == 0 {
            return Err(ConfigError::invalid("dispatch_buffer", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut config = GatewayConfig::default();
        config
            .rate_limit
            .scopes
            .insert(ScopeType::User, ScopeLimit { limit: 0, window_ms: 1000 });
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_missing_scopes_rejected() {
        let mut config = GatewayConfig::default();
        config.rate_limit.scopes.clear();
        let err = config.validate().unwrap_err();
        assert_eq!(err, ConfigError::missing("rate_limit.scopes"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = GatewayConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fail_policy_defaults_closed() {
        assert_eq!(FailurePolicy::default(), FailurePolicy::FailClosed);
    }
}
