pub mod builtin;
pub mod roster;
pub mod schema;

pub use roster::AgentRoster;
pub use schema::{AgentSpec, ToolType};
