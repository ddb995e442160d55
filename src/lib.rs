pub mod types;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod normalize;
pub mod storage;
pub mod providers;
pub mod config;

pub use config::Config;
pub use engine::{
    ChainedWorkflow, HierarchicalOrchestrator, NegotiationOrchestrator, ParallelOrchestrator, ResilientInvoker,
    SequentialOrchestrator,
};
pub use error::{BackendFailure, BranchFailure, ConfigError, InvocationError, OrchestrationError};
pub use normalize::ResponseNormalizer;
pub use types::*;
