//! Bounded in-process work queue for lifecycle events.
//!
//! One bounded channel and one delivery task per event type: delivery order
//! within a type is FIFO relative to enqueue order, cross-type ordering is
//! not guaranteed. Enqueue never blocks the producer; when a channel is full
//! the event is rejected and counted, never silently lost. Events produced
//! before the first listener attaches sit in the channel (bounded buffer)
//! until a listener arrives.
//!
//! Listener failures are isolated: a panicking listener is caught, counted,
//! and logged; it never blocks delivery to other listeners or the producer.

#[cfg(test)]
mod tests;

use dashmap::DashMap;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use fastgate_types::config::QueueConfig;
use fastgate_types::events::{LifecycleEvent, QueueEvent};

/// Opaque handle returned by [`QueueManager::on`], used to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listeners observe a reference to the event; they never own the queued value.
pub type Listener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

struct Registry {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    attached: Notify,
    panics: AtomicU64,
}

struct EventStream {
    tx: mpsc::Sender<QueueEvent>,
    registry: Arc<Registry>,
    dropped: Arc<AtomicU64>,
    _task: JoinHandle<()>,
}

struct QueueInner {
    config: QueueConfig,
    streams: DashMap<LifecycleEvent, EventStream>,
    next_listener_id: AtomicU64,
}

/// In-process event queue. Cheap to clone; all clones share the streams.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<QueueInner>,
}

impl QueueManager {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                streams: DashMap::new(),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    fn stream_for(&self, event_type: LifecycleEvent) -> dashmap::mapref::one::Ref<'_, LifecycleEvent, EventStream> {
        if let Some(stream) = self.inner.streams.get(&event_type) {
            return stream;
        }
        self.inner
            .streams
            .entry(event_type)
            .or_insert_with(|| self.spawn_stream(event_type))
            .downgrade()
    }

    fn spawn_stream(&self, event_type: LifecycleEvent) -> EventStream {
        let (tx, mut rx) = mpsc::channel::<QueueEvent>(self.inner.config.capacity_per_type);
        let registry = Arc::new(Registry {
            listeners: RwLock::new(Vec::new()),
            attached: Notify::new(),
            panics: AtomicU64::new(0),
        });
        let dropped = Arc::new(AtomicU64::new(0));

        let task_registry = registry.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Hold the event until at least one listener is attached; the
                // channel behind us is the bounded pre-listener buffer.
                loop {
                    let notified = task_registry.attached.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if !task_registry.listeners.read().is_empty() {
                        break;
                    }
                    notified.await;
                }

                let listeners: Vec<(ListenerId, Listener)> =
                    task_registry.listeners.read().clone();
                for (id, listener) in listeners {
                    if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                        task_registry.panics.fetch_add(1, Ordering::Relaxed);
                        error!(
                            event_type = %event.event_type,
                            listener_id = ?id,
                            "listener panicked, continuing delivery"
                        );
                    }
                }
            }
            debug!(%event_type, "event stream closed");
        });

        EventStream { tx, registry, dropped, _task: task }
    }

    /// Non-blocking enqueue. Returns `false` when the bounded channel is full;
    /// the rejection is counted and visible via [`dropped`](Self::dropped).
    pub fn enqueue(&self, event: QueueEvent) -> bool {
        let event_type = event.event_type;
        let stream = self.stream_for(event_type);
        match stream.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                stream.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%event_type, "event queue full, rejecting event");
                false
            },
            Err(TrySendError::Closed(_)) => {
                stream.dropped.fetch_add(1, Ordering::Relaxed);
                error!(%event_type, "event stream task gone, rejecting event");
                false
            },
        }
    }

    /// Attach a listener for one event type.
    pub fn on(&self, event_type: LifecycleEvent, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let stream = self.stream_for(event_type);
        stream.registry.listeners.write().push((id, listener));
        stream.registry.attached.notify_waiters();
        id
    }

    /// Detach a previously attached listener.
    pub fn off(&self, event_type: LifecycleEvent, id: ListenerId) -> bool {
        let Some(stream) = self.inner.streams.get(&event_type) else {
            return false;
        };
        let mut listeners = stream.registry.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// How many events were rejected for this type because the queue was full.
    pub fn dropped(&self, event_type: LifecycleEvent) -> u64 {
        self.inner
            .streams
            .get(&event_type)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// How many listener invocations panicked for this type.
    pub fn listener_panics(&self, event_type: LifecycleEvent) -> u64 {
        self.inner
            .streams
            .get(&event_type)
            .map(|s| s.registry.panics.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
