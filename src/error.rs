//! Error taxonomy for invocation and orchestration.

use std::time::Duration;

use thiserror::Error;

use crate::engine::hierarchical::TaskNode;
use crate::engine::negotiation::Proposal;
use crate::engine::sequential::StepOutput;

/// A failure reported by a capability backend, before any retry classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendFailure {
    /// The backend answered with a non-success HTTP status.
    #[error("backend returned status {code}: {body}")]
    Status { code: u16, body: String },

    /// The request did not complete in time.
    #[error("backend timed out: {0}")]
    Timeout(String),

    /// Connection or protocol level failure without a status code.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The backend answered but the body could not be understood.
    #[error("could not decode backend response: {0}")]
    Decode(String),
}

impl BackendFailure {
    pub fn status(code: u16, body: impl Into<String>) -> Self {
        BackendFailure::Status {
            code,
            body: body.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            BackendFailure::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendFailure::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            BackendFailure::status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            BackendFailure::Decode(err.to_string())
        } else {
            BackendFailure::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendFailure {
    fn from(err: serde_json::Error) -> Self {
        BackendFailure::Decode(err.to_string())
    }
}

/// Errors surfaced by the resilient invoker.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    /// Malformed prompt or configuration; no attempt was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// A retryable status or a timeout. Only escapes inside `FailedAfterRetries`
    /// or `RetryBudgetExhausted`.
    #[error("transient failure on attempt {attempt}: {cause}")]
    Transient { attempt: u32, cause: BackendFailure },

    /// A non-retryable failure; the invocation stopped at `attempt`.
    #[error("fatal failure on attempt {attempt}: {cause}")]
    Fatal { attempt: u32, cause: BackendFailure },

    /// Every allowed attempt failed with a retryable error.
    #[error("failed after {attempts} attempts: {last}")]
    FailedAfterRetries {
        attempts: u32,
        last: Box<InvocationError>,
    },

    /// The next backoff would exceed the configured total timeout.
    #[error("retry budget of {budget:?} exhausted after {attempts} attempts: {last}")]
    RetryBudgetExhausted {
        attempts: u32,
        budget: Duration,
        last: Box<InvocationError>,
    },
}

impl InvocationError {
    pub fn kind(&self) -> &'static str {
        match self {
            InvocationError::Validation(_) => "validation",
            InvocationError::Transient { .. } => "transient",
            InvocationError::Fatal { .. } => "fatal",
            InvocationError::FailedAfterRetries { .. } => "failed_after_retries",
            InvocationError::RetryBudgetExhausted { .. } => "retry_budget_exhausted",
        }
    }

    /// Number of attempts made before giving up, if any were made.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            InvocationError::Validation(_) => None,
            InvocationError::Transient { attempt, .. } | InvocationError::Fatal { attempt, .. } => {
                Some(*attempt)
            }
            InvocationError::FailedAfterRetries { attempts, .. }
            | InvocationError::RetryBudgetExhausted { attempts, .. } => Some(*attempts),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, InvocationError::Transient { .. })
    }
}

/// Failure of a single fan-out branch. Recorded, never propagated past the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum BranchFailure {
    #[error("{stage} stage failed: {source}")]
    Invocation {
        stage: &'static str,
        #[source]
        source: InvocationError,
    },

    #[error("branch task panicked: {0}")]
    Panicked(String),
}

impl BranchFailure {
    pub fn attempts(&self) -> Option<u32> {
        match self {
            BranchFailure::Invocation { source, .. } => source.attempts(),
            BranchFailure::Panicked(_) => None,
        }
    }
}

/// Errors that abort an orchestrator run.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("invalid orchestration input: {0}")]
    Validation(String),

    /// A sequential step failed; later steps never ran.
    #[error("step {step} ({role}) failed [{}]: {source}", .source.kind())]
    StepFailed {
        step: usize,
        role: String,
        #[source]
        source: InvocationError,
        completed: Vec<StepOutput>,
    },

    /// A hierarchical node failed. `partial` holds the tree as far as it got.
    #[error("node {node} failed [{}]: {source}", .source.kind())]
    NodeFailed {
        node: String,
        #[source]
        source: InvocationError,
        partial: Box<TaskNode>,
    },

    /// A hierarchical node's task panicked. `partial` marks it unsettled.
    #[error("node {node} panicked: {message}")]
    NodePanicked {
        node: String,
        message: String,
        partial: Box<TaskNode>,
    },

    /// A required stage of the chained workflow failed.
    #[error("{stage} stage failed [{}]: {source}", .source.kind())]
    StageFailed {
        stage: &'static str,
        #[source]
        source: InvocationError,
    },

    /// Every proposer failed, so the judge had nothing to rank.
    #[error("all {} proposers failed", .failures.len())]
    NoProposals {
        failures: Vec<(String, BranchFailure)>,
    },

    #[error("judge failed [{}]: {source}", .source.kind())]
    JudgeFailed {
        #[source]
        source: InvocationError,
        proposals: Vec<Proposal>,
    },
}

impl OrchestrationError {
    /// The step, node or branch identifier the failure belongs to.
    pub fn location(&self) -> Option<String> {
        match self {
            OrchestrationError::StepFailed { step, role, .. } => Some(format!("step {} ({})", step, role)),
            OrchestrationError::NodeFailed { node, .. }
            | OrchestrationError::NodePanicked { node, .. } => Some(node.clone()),
            OrchestrationError::JudgeFailed { .. } => Some("judge".to_string()),
            OrchestrationError::StageFailed { stage, .. } => Some(stage.to_string()),
            OrchestrationError::Validation(_) | OrchestrationError::NoProposals { .. } => None,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            OrchestrationError::StepFailed { source, .. }
            | OrchestrationError::NodeFailed { source, .. }
            | OrchestrationError::JudgeFailed { source, .. }
            | OrchestrationError::StageFailed { source, .. } => source.attempts(),
            _ => None,
        }
    }
}

impl From<InvocationError> for BranchFailure {
    fn from(source: InvocationError) -> Self {
        BranchFailure::Invocation {
            stage: "invoke",
            source,
        }
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("missing credential {0} for the selected backend")]
    MissingCredential(&'static str),
}
