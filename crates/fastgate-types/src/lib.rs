//! # Fastgate Types
//!
//! Core types, protocol vocabulary, and error definitions for fastgate.
//!
//! This crate provides the foundational type system for the gateway:
//!
//! - **`error`** - Typed error taxonomy for admission, circuit, retry, and stream failures
//! - **`protocol`** - Upstream push-event frames and the internal event vocabulary
//! - **`events`** - Lifecycle events carried by the internal work queue
//! - **`config`** - Gateway configuration with fail-fast validation
//!
//! ## Architecture Role
//!
//! `fastgate-types` sits at the bottom of the dependency graph:
//!
//! ```text
//!     fastgate-types (this crate)
//!            │
//!            ▼
//!     fastgate-core
//! ```
//!
//! All types are designed to be:
//! - **Serializable** via serde for API/IPC
//! - **Clone** for cheap sharing across async boundaries
//! - **PartialEq** for testing and comparison

pub mod config;
pub mod error;
pub mod events;
pub mod protocol;

// Re-export error types for convenience
pub use error::{ConfigError, GatewayError, Result};

// Re-export core vocabulary
pub use config::{
    CircuitBreakerConfig, FailurePolicy, GatewayConfig, QueueConfig, RateLimitConfig, RetryConfig,
    ScopeLimit,
};
pub use events::{LifecycleEvent, QueueEvent};
pub use protocol::{
    RawFrame, ScopeType, SessionPhase, StatusUpdate, StreamEvent, StreamStatus,
};
