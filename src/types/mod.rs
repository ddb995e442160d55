pub mod invocation;
pub mod prompt;
pub mod response;

pub use invocation::InvocationConfig;
pub use prompt::Prompt;
pub use response::{Content, Event, EventStream, Part, Response};

use serde::{Deserialize, Serialize};

pub type RunId = uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationState {
    Pending,  // Not yet looked up
    CacheHit, // Answered from cache
    InFlight, // First attempt running
    Retrying, // A retryable failure happened, further attempts running
    Done,     // Normalized text available
    Failed,   // Terminal failure
}

impl InvocationState {
    pub fn as_str(&self) -> &str {
        match self {
            InvocationState::Pending => "PENDING",
            InvocationState::CacheHit => "CACHE_HIT",
            InvocationState::InFlight => "IN_FLIGHT",
            InvocationState::Retrying => "RETRYING",
            InvocationState::Done => "DONE",
            InvocationState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvocationState::Done | InvocationState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Sequential,
    Parallel,
    Hierarchical,
    Negotiation,
    /// Search, metric extraction and synthesis by one agent.
    Chained,
}

impl Topology {
    pub fn as_str(&self) -> &str {
        match self {
            Topology::Sequential => "sequential",
            Topology::Parallel => "parallel",
            Topology::Hierarchical => "hierarchical",
            Topology::Negotiation => "negotiation",
            Topology::Chained => "chained",
        }
    }
}

impl std::str::FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Topology::Sequential),
            "parallel" => Ok(Topology::Parallel),
            "hierarchical" => Ok(Topology::Hierarchical),
            "negotiation" => Ok(Topology::Negotiation),
            "chained" => Ok(Topology::Chained),
            other => Err(format!("unknown topology '{}'", other)),
        }
    }
}
