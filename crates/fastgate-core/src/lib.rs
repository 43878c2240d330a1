//! # Fastgate Core
//!
//! Streaming protocol dispatcher and resilience shell for proxying chat
//! requests to upstream FastGPT-style providers.
//!
//! ```text
//! fastgate-core/src/gateway/
//! ├── rate_limit/       # Sliding-window admission control (ip/user/endpoint)
//! ├── dedup.rs          # Single-flight request deduplication
//! ├── circuit_breaker/  # Per-target fail-fast state machine
//! ├── retry/            # Bounded exponential backoff with jitter
//! ├── queue/            # Bounded in-process work queue for lifecycle events
//! ├── dispatch/         # Push-event protocol state machine + typed callbacks
//! ├── upstream.rs       # Transport seam (trait + frame stream)
//! └── orchestrator.rs   # Composition: admit → dedup → breaker → retry → dispatch
//! ```
//!
//! The gateway guarantees at-least-once delivery of stream events to the
//! caller's callbacks; idempotent client-side rendering is the assumed
//! contract.

pub mod gateway;

pub use gateway::{ChatGateway, ChatRequest, SessionHandle, StreamCallbacks};
