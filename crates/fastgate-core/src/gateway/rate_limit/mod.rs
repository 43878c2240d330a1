//! Sliding-window admission control.
//!
//! Requests are checked against independent windows per scope (ip, user,
//! endpoint); all configured scopes must admit, and the first rejection
//! short-circuits with the blocking scope and a retry-after hint. Windows are
//! keyed in a concurrent map so unrelated keys never contend on one lock;
//! read-modify-write for a single key is serialized by the map entry.

mod window;


use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use fastgate_types::config::{FailurePolicy, RateLimitConfig, ScopeLimit};
use fastgate_types::error::GatewayError;
use fastgate_types::protocol::ScopeType;

use crate::gateway::ScopeKeys;
use window::RateWindow;

/// Scopes are always evaluated in this order, so the tie-break at the window
/// boundary is deterministic.
const SCOPE_ORDER: [ScopeType; 3] = [ScopeType::Ip, ScopeType::User, ScopeType::Endpoint];

/// Raised by a window store that cannot answer an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUnavailable;

/// Backing store for per-key windows.
///
/// The in-process [`MemoryWindowStore`] never fails; the seam exists so the
/// configured [`FailurePolicy`] is honest and testable.
pub trait WindowStore: Send + Sync {
    /// Serialized check-and-record for one scope key.
    fn try_record(
        &self,
        scope: ScopeType,
        key: &str,
        now: Instant,
        limit: ScopeLimit,
    ) -> Result<Result<(), Duration>, StoreUnavailable>;

    /// Undo one recorded admission after a later scope rejected the request.
    fn rollback(&self, scope: ScopeType, key: &str, recorded_at: Instant);

    /// Drop windows idle longer than `ttl`; returns how many were removed.
    fn sweep(&self, now: Instant, ttl: Duration) -> usize;
}

/// Default store: one window per (scope, key) in a sharded concurrent map.
#[derive(Default)]
pub struct MemoryWindowStore {
    windows: DashMap<(ScopeType, String), RateWindow>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self, scope: ScopeType, key: &str) -> Option<usize> {
        self.windows.get(&(scope, key.to_string())).map(|w| w.len())
    }
}

impl WindowStore for MemoryWindowStore {
    fn try_record(
        &self,
        scope: ScopeType,
        key: &str,
        now: Instant,
        limit: ScopeLimit,
    ) -> Result<Result<(), Duration>, StoreUnavailable> {
        let mut entry = self
            .windows
            .entry((scope, key.to_string()))
            .or_insert_with(|| RateWindow::new(now));
        Ok(entry.try_record(now, limit.limit, Duration::from_millis(limit.window_ms)))
    }

    fn rollback(&self, scope: ScopeType, key: &str, recorded_at: Instant) {
        if let Some(mut entry) = self.windows.get_mut(&(scope, key.to_string())) {
            entry.unrecord(recorded_at);
        }
    }

    fn sweep(&self, now: Instant, ttl: Duration) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| now.duration_since(w.last_seen) < ttl);
        before - self.windows.len()
    }
}

/// Multi-scope sliding-window rate limiter.
pub struct SlidingWindowLimiter<S: WindowStore = MemoryWindowStore> {
    config: RateLimitConfig,
    store: S,
}

impl SlidingWindowLimiter<MemoryWindowStore> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, store: MemoryWindowStore::new() }
    }
}

impl<S: WindowStore> SlidingWindowLimiter<S> {
    pub fn with_store(config: RateLimitConfig, store: S) -> Self {
        Self { config, store }
    }

    /// Check every configured scope; admit only if all admit.
    ///
    /// Admission records one hit in each configured scope; a rejection rolls
    /// back the hits already recorded for this request so a rejected request
    /// leaves no quota consumed anywhere.
    pub fn try_admit(&self, keys: &ScopeKeys) -> Result<(), GatewayError> {
        let now = Instant::now();
        let mut recorded: Vec<(ScopeType, &str)> = Vec::with_capacity(SCOPE_ORDER.len());

        for scope in SCOPE_ORDER {
            let Some(&limit) = self.config.scopes.get(&scope) else {
                continue;
            };
            let key = keys.for_scope(scope);

            match self.store.try_record(scope, key, now, limit) {
                Ok(Ok(())) => recorded.push((scope, key)),
                Ok(Err(wait)) => {
                    self.rollback(&recorded, now);
                    let retry_after_ms = (wait.as_millis() as u64).max(1);
                    debug!(%scope, key, retry_after_ms, "admission rejected");
                    return Err(GatewayError::AdmissionRejected { scope, retry_after_ms });
                },
                Err(StoreUnavailable) => match self.config.failure_policy {
                    FailurePolicy::FailOpen => {
                        warn!(%scope, key, "window store unavailable, failing open");
                    },
                    FailurePolicy::FailClosed => {
                        self.rollback(&recorded, now);
                        warn!(%scope, key, "window store unavailable, failing closed");
                        return Err(GatewayError::AdmissionRejected {
                            scope,
                            retry_after_ms: limit.window_ms,
                        });
                    },
                },
            }
        }

        Ok(())
    }

    fn rollback(&self, recorded: &[(ScopeType, &str)], recorded_at: Instant) {
        for &(scope, key) in recorded {
            self.store.rollback(scope, key, recorded_at);
        }
    }

    /// TTL sweep for idle windows; call periodically from the embedder.
    pub fn cleanup_expired(&self) -> usize {
        let removed = self
            .store
            .sweep(Instant::now(), Duration::from_millis(self.config.idle_ttl_ms));
        if removed > 0 {
            debug!(removed, "swept idle rate windows");
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }
}
