//! Per-scope-key sliding window state.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Ordered admission timestamps for one scope key.
///
/// Stale entries are evicted lazily on every check, so the retained count
/// never exceeds the limit once an over-limit request arrives in-window.
#[derive(Debug)]
pub(super) struct RateWindow {
    hits: VecDeque<Instant>,
    pub(super) last_seen: Instant,
}

impl RateWindow {
    pub(super) fn new(now: Instant) -> Self {
        Self { hits: VecDeque::new(), last_seen: now }
    }

    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit-and-record, or report how long until the oldest hit leaves the window.
    ///
    /// Rejection does not mutate admission state (eviction aside).
    pub(super) fn try_record(
        &mut self,
        now: Instant,
        limit: u32,
        window: Duration,
    ) -> Result<(), Duration> {
        self.last_seen = now;
        self.evict(now, window);

        if self.hits.len() >= limit as usize {
            let wait = self
                .hits
                .front()
                .map(|&oldest| window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(window);
            return Err(wait);
        }

        self.hits.push_back(now);
        Ok(())
    }

    /// Roll back one recorded admission (a later scope rejected the request).
    pub(super) fn unrecord(&mut self, recorded_at: Instant) {
        if let Some(pos) = self.hits.iter().rposition(|&t| t == recorded_at) {
            self.hits.remove(pos);
        }
    }

    pub(super) fn len(&self) -> usize {
        self.hits.len()
    }
}
