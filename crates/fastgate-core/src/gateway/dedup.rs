//! Single-flight request deduplication.
//!
//! Concurrent requests with the same fingerprint collapse into one upstream
//! call; the producer's result is fanned out to every attached waiter. The
//! entry is removed the moment the producer resolves, success or failure,
//! so a later identical request starts a fresh flight.
//!
//! Waiters are reference-counted: cancelling one waiter never cancels the
//! shared producer while others remain attached, and the producer is aborted
//! only when the last waiter detaches.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use fastgate_types::error::GatewayError;

/// Deterministic fingerprint over request-affecting fields only.
///
/// Trace IDs and timestamps must never reach this function; `serde_json`
/// serializes object keys in sorted order, so equal payloads hash equally.
pub fn fingerprint(endpoint_key: &str, user_key: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint_key.as_bytes());
    hasher.update([0]);
    hasher.update(user_key.as_bytes());
    hasher.update([0]);
    hasher.update(payload.to_string().as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("fp-{}", &hash[..32])
}

struct FlightEntry<T> {
    tx: broadcast::Sender<Result<T, GatewayError>>,
    waiters: AtomicUsize,
    done: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

struct FlightInner<T> {
    inflight: DashMap<String, Arc<FlightEntry<T>>>,
}

/// Single-flight map. Cheap to clone; all clones share the in-flight set.
pub struct SingleFlight<T: Clone + Send + 'static> {
    inner: Arc<FlightInner<T>>,
}

impl<T: Clone + Send + 'static> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the waiter count on drop; the last waiter aborts the producer.
struct WaiterGuard<T: Clone + Send + 'static> {
    flight: SingleFlight<T>,
    entry: Arc<FlightEntry<T>>,
    fingerprint: String,
}

impl<T: Clone + Send + 'static> Drop for WaiterGuard<T> {
    fn drop(&mut self) {
        let remaining = self.entry.waiters.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && !self.entry.done.load(Ordering::SeqCst) {
            debug!(fingerprint = %self.fingerprint, "last waiter detached, aborting producer");
            if let Some(handle) = self.entry.abort.lock().take() {
                handle.abort();
            }
            self.flight
                .inner
                .inflight
                .remove_if(&self.fingerprint, |_, e| Arc::ptr_eq(e, &self.entry));
        }
    }
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self { inner: Arc::new(FlightInner { inflight: DashMap::new() }) }
    }

    /// Attach to the in-flight call for `fingerprint`, or become its producer.
    ///
    /// `make` is only invoked on the producer path; the produced future runs
    /// on its own task so that cancelling this caller does not cancel the
    /// shared call while other waiters remain.
    pub async fn join_or_create<F, Fut>(
        &self,
        fingerprint: &str,
        make: F,
    ) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let (entry, mut rx, is_producer) = match self.inner.inflight.entry(fingerprint.to_string())
        {
            Entry::Occupied(occupied) => {
                let entry = occupied.get().clone();
                entry.waiters.fetch_add(1, Ordering::SeqCst);
                // Subscribe while the map entry is held: the producer removes
                // the entry before broadcasting, so anyone who saw the entry
                // is subscribed before the send.
                let rx = entry.tx.subscribe();
                debug!(fingerprint, "joined in-flight request");
                (entry, rx, false)
            },
            Entry::Vacant(vacant) => {
                let (tx, rx) = broadcast::channel(1);
                let entry = Arc::new(FlightEntry {
                    tx,
                    waiters: AtomicUsize::new(1),
                    done: AtomicBool::new(false),
                    abort: Mutex::new(None),
                });
                vacant.insert(entry.clone());
                (entry, rx, true)
            },
        };

        let guard = WaiterGuard {
            flight: self.clone(),
            entry: entry.clone(),
            fingerprint: fingerprint.to_string(),
        };

        if is_producer {
            let fut = make();
            let flight = self.clone();
            let fp = fingerprint.to_string();
            let task_entry = entry.clone();
            let handle = tokio::spawn(async move {
                let result = fut.await;
                task_entry.done.store(true, Ordering::SeqCst);
                // Remove before sending so no new joiner can subscribe to a
                // channel whose value has already been broadcast.
                flight
                    .inner
                    .inflight
                    .remove_if(&fp, |_, e| Arc::ptr_eq(e, &task_entry));
                let _ = task_entry.tx.send(result);
            });
            *entry.abort.lock() = Some(handle.abort_handle());
        }

        let result = match rx.recv().await {
            Ok(result) => result,
            Err(err) => {
                warn!(fingerprint, %err, "shared producer vanished without a result");
                Err(GatewayError::Internal {
                    message: "shared request producer terminated without a result".to_string(),
                })
            },
        };
        drop(guard);
        result
    }

    /// Number of currently in-flight fingerprints.
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }
}
