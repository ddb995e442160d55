use std::sync::Arc;

use crate::definitions::AgentSpec;

/// Text issued to one agent. Immutable once built.
#[derive(Debug, Clone)]
pub struct Prompt {
    agent: Arc<AgentSpec>,
    text: String,
}

impl Prompt {
    pub fn new(agent: Arc<AgentSpec>, text: impl Into<String>) -> Self {
        Self {
            agent,
            text: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn agent(&self) -> &AgentSpec {
        &self.agent
    }

    /// The issuing agent's name.
    pub fn role(&self) -> &str {
        &self.agent.name
    }

    /// The agent's standing instruction, sent as system context.
    pub fn instruction(&self) -> &str {
        &self.agent.instruction
    }

    /// Cache key scoped to the issuing agent.
    ///
    /// Orchestrators use this instead of the bare text so that agents sharing an
    /// identical prompt (negotiation proposers) keep separate entries.
    pub fn scoped_key(&self) -> String {
        format!("{}\u{1f}{}", self.agent.name, self.text)
    }
}
