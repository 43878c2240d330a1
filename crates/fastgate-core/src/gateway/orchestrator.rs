//! Chat proxy orchestrator.
//!
//! Composes the resilience shell around each inbound chat request:
//! admission control, single-flight deduplication, circuit-breaker gating,
//! retry with backoff, and the streaming dispatcher, emitting lifecycle
//! events to the work queue along the way.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use fastgate_types::config::GatewayConfig;
use fastgate_types::error::{ConfigError, GatewayError};
use fastgate_types::events::{LifecycleEvent, QueueEvent};
use fastgate_types::protocol::StatusUpdate;

use super::circuit_breaker::{CircuitBreaker, CircuitSummary, CircuitTransition};
use super::dedup::{self, SingleFlight};
use super::dispatch::{SessionOutcome, StreamCallbacks, StreamDispatcher};
use super::queue::QueueManager;
use super::rate_limit::SlidingWindowLimiter;
use super::retry::RetryPolicy;
use super::upstream::{UpstreamRequest, UpstreamTransport};
use super::ScopeKeys;

/// One inbound chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub scope: ScopeKeys,
    pub payload: Value,
}

/// Aggregate gateway counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GatewayStats {
    pub submitted: u64,
    pub joined_in_flight: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct StatsInner {
    submitted: AtomicU64,
    joined_in_flight: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

struct GatewayInner {
    config: GatewayConfig,
    limiter: SlidingWindowLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    flights: SingleFlight<SessionOutcome>,
    queue: QueueManager,
    transport: Arc<dyn UpstreamTransport>,
    stats: StatsInner,
}

/// The gateway core. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ChatGateway {
    inner: Arc<GatewayInner>,
}

/// Handle for one submitted request.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: String,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<Result<SessionOutcome, GatewayError>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Caller-initiated cancellation.
    ///
    /// Stops forwarding frames to this caller's callbacks immediately and
    /// detaches from the shared flight; the shared upstream call is aborted
    /// (and its transport closed) only when this was the last waiter.
    /// Rate-limiter counters are left untouched.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    /// Await the terminal outcome of this request.
    pub async fn wait(self) -> Result<SessionOutcome, GatewayError> {
        match self.task.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Err(GatewayError::Internal {
                message: "session cancelled by caller".to_string(),
            }),
            Err(_) => Err(GatewayError::Internal {
                message: "session task panicked".to_string(),
            }),
        }
    }
}

/// Gates every forward on the caller's cancellation flag.
struct CancellableCallbacks {
    inner: Arc<dyn StreamCallbacks>,
    cancelled: Arc<AtomicBool>,
}

impl CancellableCallbacks {
    fn live(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }
}

impl StreamCallbacks for CancellableCallbacks {
    fn on_chunk(&self, text: &str) {
        if self.live() {
            self.inner.on_chunk(text);
        }
    }
    fn on_status(&self, update: &StatusUpdate) {
        if self.live() {
            self.inner.on_status(update);
        }
    }
    fn on_interactive(&self, prompt: &Value) {
        if self.live() {
            self.inner.on_interactive(prompt);
        }
    }
    fn on_reasoning(&self, step: &Value) {
        if self.live() {
            self.inner.on_reasoning(step);
        }
    }
    fn on_chat_id(&self, chat_id: &str) {
        if self.live() {
            self.inner.on_chat_id(chat_id);
        }
    }
    fn on_dataset(&self, reference: &Value) {
        if self.live() {
            self.inner.on_dataset(reference);
        }
    }
    fn on_summary(&self, text: &str) {
        if self.live() {
            self.inner.on_summary(text);
        }
    }
    fn on_tool(&self, call: &Value) {
        if self.live() {
            self.inner.on_tool(call);
        }
    }
    fn on_usage(&self, counters: &Value) {
        if self.live() {
            self.inner.on_usage(counters);
        }
    }
    fn on_end(&self, trailing: Option<&Value>) {
        if self.live() {
            self.inner.on_end(trailing);
        }
    }
    fn on_error(&self, error: &GatewayError) {
        if self.live() {
            self.inner.on_error(error);
        }
    }
}

/// Forwards everything except `on_error`.
///
/// Per-attempt terminal causes are not surfaced while the retry loop may
/// still recover; the orchestrator surfaces the final error exactly once.
struct SuppressErrors {
    inner: Arc<dyn StreamCallbacks>,
}

impl StreamCallbacks for SuppressErrors {
    fn on_chunk(&self, text: &str) {
        self.inner.on_chunk(text);
    }
    fn on_status(&self, update: &StatusUpdate) {
        self.inner.on_status(update);
    }
    fn on_interactive(&self, prompt: &Value) {
        self.inner.on_interactive(prompt);
    }
    fn on_reasoning(&self, step: &Value) {
        self.inner.on_reasoning(step);
    }
    fn on_chat_id(&self, chat_id: &str) {
        self.inner.on_chat_id(chat_id);
    }
    fn on_dataset(&self, reference: &Value) {
        self.inner.on_dataset(reference);
    }
    fn on_summary(&self, text: &str) {
        self.inner.on_summary(text);
    }
    fn on_tool(&self, call: &Value) {
        self.inner.on_tool(call);
    }
    fn on_usage(&self, counters: &Value) {
        self.inner.on_usage(counters);
    }
    fn on_end(&self, trailing: Option<&Value>) {
        self.inner.on_end(trailing);
    }
    fn on_error(&self, _error: &GatewayError) {}
}

impl ChatGateway {
    /// Build the gateway; fails fast on invalid configuration.
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn UpstreamTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let inner = GatewayInner {
            limiter: SlidingWindowLimiter::new(config.rate_limit.clone()),
            breaker: CircuitBreaker::new(config.circuit_breaker),
            retry: RetryPolicy::new(config.retry),
            flights: SingleFlight::new(),
            queue: QueueManager::new(config.queue),
            transport,
            stats: StatsInner::default(),
            config,
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// The lifecycle event queue; monitoring collaborators attach here.
    pub fn queue(&self) -> &QueueManager {
        &self.inner.queue
    }

    pub fn circuit_summary(&self) -> CircuitSummary {
        self.inner.breaker.summary()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            submitted: self.inner.stats.submitted.load(Ordering::Relaxed),
            joined_in_flight: self.inner.stats.joined_in_flight.load(Ordering::Relaxed),
            completed: self.inner.stats.completed.load(Ordering::Relaxed),
            failed: self.inner.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// TTL sweep of idle rate windows; call periodically from the embedder.
    pub fn cleanup_expired(&self) -> usize {
        self.inner.limiter.cleanup_expired()
    }

    /// Submit one chat request.
    ///
    /// Admission rejection is surfaced immediately, before any upstream work
    /// or retry attempt. On success the request runs on its own task and the
    /// returned handle supports cancellation and awaiting the outcome.
    pub fn submit(
        &self,
        request: ChatRequest,
        callbacks: Arc<dyn StreamCallbacks>,
    ) -> Result<SessionHandle, GatewayError> {
        if let Err(err) = self.inner.limiter.try_admit(&request.scope) {
            if let GatewayError::AdmissionRejected { scope, retry_after_ms } = &err {
                self.inner
                    .queue
                    .enqueue(QueueEvent::rejected(*scope, *retry_after_ms));
            }
            return Err(err);
        }

        let session_id = format!("sess-{}", Uuid::new_v4());
        self.inner.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.queue.enqueue(QueueEvent::new(
            LifecycleEvent::Admitted,
            json!({
                "session_id": session_id,
                "endpoint": request.scope.endpoint,
                "user": request.scope.user,
            }),
        ));

        let fingerprint =
            dedup::fingerprint(&request.scope.endpoint, &request.scope.user, &request.payload);

        let cancelled = Arc::new(AtomicBool::new(false));
        let caller: Arc<dyn StreamCallbacks> = Arc::new(CancellableCallbacks {
            inner: callbacks,
            cancelled: cancelled.clone(),
        });

        let inner = self.inner.clone();
        let task_session_id = session_id.clone();
        let task = tokio::spawn(async move {
            let was_producer = Arc::new(AtomicBool::new(false));
            let producer_flag = was_producer.clone();
            let flight_inner = inner.clone();
            let upstream_request = UpstreamRequest {
                endpoint_key: request.scope.endpoint.clone(),
                payload: request.payload.clone(),
                session_id: task_session_id.clone(),
            };
            let live_callbacks: Arc<dyn StreamCallbacks> =
                Arc::new(SuppressErrors { inner: caller.clone() });

            let outcome = inner
                .flights
                .join_or_create(&fingerprint, move || {
                    producer_flag.store(true, Ordering::SeqCst);
                    produce(flight_inner, upstream_request, task_session_id, live_callbacks)
                })
                .await;

            if was_producer.load(Ordering::SeqCst) {
                // Live callbacks already saw everything except the final
                // error, which the dispatcher was told to hold back.
                if let Err(err) = &outcome {
                    caller.on_error(err);
                }
            } else {
                inner.stats.joined_in_flight.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint, "replaying shared result to joined caller");
                replay(caller.as_ref(), &outcome);
            }

            outcome
        });

        Ok(SessionHandle { session_id, cancelled, task })
    }
}

/// Fan the shared flight result out to a caller that joined mid-flight.
fn replay(callbacks: &dyn StreamCallbacks, outcome: &Result<SessionOutcome, GatewayError>) {
    match outcome {
        Ok(outcome) => {
            if let Some(chat_id) = &outcome.chat_id {
                callbacks.on_chat_id(chat_id);
            }
            if !outcome.accumulated_text.is_empty() {
                callbacks.on_chunk(&outcome.accumulated_text);
            }
            callbacks.on_end(outcome.end_payload.as_ref());
        },
        Err(err) => callbacks.on_error(err),
    }
}

/// The single shared upstream call for one fingerprint: circuit-gated,
/// timeout-bounded, retry-wrapped, streamed through the dispatcher.
async fn produce(
    inner: Arc<GatewayInner>,
    request: UpstreamRequest,
    session_id: String,
    callbacks: Arc<dyn StreamCallbacks>,
) -> Result<SessionOutcome, GatewayError> {
    let target = inner.transport.target().to_string();

    let result = inner
        .retry
        .execute(|attempt| {
            let inner = inner.clone();
            let request = request.clone();
            let callbacks = callbacks.clone();
            let session_id = session_id.clone();
            let target = target.clone();
            async move {
                let permit = inner.breaker.acquire(&target)?;

                let attempt_result = tokio::time::timeout(inner.config.upstream_timeout(), async {
                    let frames = inner.transport.open(&request).await?;
                    let dispatcher = StreamDispatcher::new(session_id.clone());
                    let (session, result) =
                        dispatcher.run(frames, callbacks, inner.config.dispatch_buffer).await;
                    result.map(|()| SessionOutcome::from(&session))
                })
                .await
                .map_err(|_| GatewayError::UpstreamTransport {
                    message: format!(
                        "upstream call exceeded {}ms ceiling",
                        inner.config.upstream_timeout_ms
                    ),
                })
                .and_then(|r| r);

                let transition = match &attempt_result {
                    Ok(_) => permit.success(),
                    Err(err) if err.should_trip_circuit() => {
                        debug!(%target, attempt, code = err.error_code(), "attempt failed");
                        permit.failure(err.error_code())
                    },
                    // Rejections and client errors release the permit without
                    // touching failure accounting.
                    Err(_) => None,
                };
                if let Some(transition) = transition {
                    let event_type = match transition {
                        CircuitTransition::Opened => LifecycleEvent::CircuitOpened,
                        CircuitTransition::Closed => LifecycleEvent::CircuitClosed,
                    };
                    inner
                        .queue
                        .enqueue(QueueEvent::new(event_type, json!({ "target": target })));
                }

                attempt_result
            }
        })
        .await;

    match &result {
        Ok(outcome) => {
            inner.stats.completed.fetch_add(1, Ordering::Relaxed);
            info!(session_id = %outcome.session_id, "session completed");
            inner.queue.enqueue(QueueEvent::new(
                LifecycleEvent::SessionCompleted,
                json!({
                    "session_id": outcome.session_id,
                    "chat_id": outcome.chat_id,
                }),
            ));
        },
        Err(err) => {
            if let GatewayError::RetryExhausted { attempts, last_cause } = err {
                inner.queue.enqueue(QueueEvent::new(
                    LifecycleEvent::RetryExhausted,
                    json!({
                        "session_id": session_id,
                        "attempts": attempts,
                        "last_cause": last_cause.error_code(),
                    }),
                ));
            }
            inner.stats.failed.fetch_add(1, Ordering::Relaxed);
            inner.queue.enqueue(QueueEvent::new(
                LifecycleEvent::SessionFailed,
                json!({
                    "session_id": session_id,
                    "code": err.error_code(),
                }),
            ));
        },
    }

    result
}
