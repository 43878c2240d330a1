//! Gateway core: admission, deduplication, circuit breaking, retry, and the
//! streaming protocol dispatcher, composed by [`ChatGateway`].

pub mod circuit_breaker;
pub mod dedup;
pub mod dispatch;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod upstream;

mod orchestrator;


pub use dispatch::{SessionOutcome, StreamCallbacks, StreamDispatcher, StreamSession};
pub use orchestrator::{ChatGateway, ChatRequest, GatewayStats, SessionHandle};

use fastgate_types::protocol::ScopeType;

/// Already-validated scope keys for one inbound request.
///
/// The authentication collaborator validates these upstream of the gateway;
/// the core trusts them as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeKeys {
    pub ip: String,
    pub user: String,
    pub endpoint: String,
}

impl ScopeKeys {
    pub fn new(
        ip: impl Into<String>,
        user: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self { ip: ip.into(), user: user.into(), endpoint: endpoint.into() }
    }

    pub fn for_scope(&self, scope: ScopeType) -> &str {
        match scope {
            ScopeType::Ip => &self.ip,
            ScopeType::User => &self.user,
            ScopeType::Endpoint => &self.endpoint,
        }
    }
}
