//! Upstream transport seam.
//!
//! The wire format (text-event-stream framing, HTTP client, provider URLs)
//! lives outside the core; the gateway only requires an ordered sequence of
//! tagged frames and that dropping the stream closes the transport.

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use fastgate_types::error::GatewayError;
use fastgate_types::protocol::RawFrame;

/// Ordered frame sequence for one upstream call.
///
/// An `Err` item is a transport-level failure; the stream ending without a
/// prior terminal frame is observed by the dispatcher as an incomplete
/// stream. Dropping the stream must close the underlying transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RawFrame, GatewayError>> + Send>>;

/// Outbound call handed to the transport collaborator.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub endpoint_key: String,
    pub payload: Value,
    pub session_id: String,
}

/// One upstream provider target.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Target identifier used for circuit-breaker accounting.
    fn target(&self) -> &str;

    /// Open one push-event stream for the request.
    async fn open(&self, request: &UpstreamRequest) -> Result<FrameStream, GatewayError>;
}
