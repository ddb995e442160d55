use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::types::InvocationState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationEvent {
    CacheHit,
    CacheMiss,
    RetryScheduled,
    Succeeded,
    Failed,
}

/// Tracks one invocation through its states and keeps the trace.
#[derive(Debug, Clone)]
pub struct InvocationStateMachine {
    state: InvocationState,
    trace: Vec<InvocationState>,
}

impl Default for InvocationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationStateMachine {
    pub fn new() -> Self {
        Self {
            state: InvocationState::Pending,
            trace: vec![InvocationState::Pending],
        }
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn trace(&self) -> &[InvocationState] {
        &self.trace
    }

    pub fn into_trace(self) -> Vec<InvocationState> {
        self.trace
    }

    pub fn apply(&mut self, event: InvocationEvent) -> Result<InvocationState> {
        let next = Self::transition(self.state, event)?;
        self.state = next;
        self.trace.push(next);
        Ok(next)
    }

    pub fn transition(state: InvocationState, event: InvocationEvent) -> Result<InvocationState> {
        let next = match (state, event) {
            (InvocationState::Pending, InvocationEvent::CacheHit) => InvocationState::CacheHit,
            (InvocationState::Pending, InvocationEvent::CacheMiss) => InvocationState::InFlight,
            (InvocationState::CacheHit, InvocationEvent::Succeeded) => InvocationState::Done,

            (
                InvocationState::InFlight | InvocationState::Retrying,
                InvocationEvent::RetryScheduled,
            ) => InvocationState::Retrying,
            (InvocationState::InFlight | InvocationState::Retrying, InvocationEvent::Succeeded) => {
                InvocationState::Done
            }
            (InvocationState::InFlight | InvocationState::Retrying, InvocationEvent::Failed) => {
                InvocationState::Failed
            }

            _ => {
                return Err(anyhow!(
                    "Invalid invocation transition from {} with event {:?}",
                    state.as_str(),
                    event
                ));
            }
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_path() {
        let mut machine = InvocationStateMachine::new();
        machine.apply(InvocationEvent::CacheHit).unwrap();
        machine.apply(InvocationEvent::Succeeded).unwrap();

        assert_eq!(
            machine.trace(),
            &[
                InvocationState::Pending,
                InvocationState::CacheHit,
                InvocationState::Done
            ]
        );
    }

    #[test]
    fn test_retry_path() {
        let mut machine = InvocationStateMachine::new();
        machine.apply(InvocationEvent::CacheMiss).unwrap();
        machine.apply(InvocationEvent::RetryScheduled).unwrap();
        machine.apply(InvocationEvent::RetryScheduled).unwrap();
        machine.apply(InvocationEvent::Succeeded).unwrap();

        assert_eq!(machine.state(), InvocationState::Done);
        assert_eq!(machine.trace().len(), 5);
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut machine = InvocationStateMachine::new();
        machine.apply(InvocationEvent::CacheMiss).unwrap();
        machine.apply(InvocationEvent::Failed).unwrap();

        assert!(machine.state().is_terminal());
        assert!(machine.apply(InvocationEvent::RetryScheduled).is_err());
        assert!(machine.apply(InvocationEvent::Succeeded).is_err());
    }

    #[test]
    fn test_cache_hit_cannot_retry() {
        let result =
            InvocationStateMachine::transition(InvocationState::CacheHit, InvocationEvent::RetryScheduled);
        assert!(result.is_err());
    }

    #[test]
    fn test_pending_cannot_succeed_directly() {
        let result =
            InvocationStateMachine::transition(InvocationState::Pending, InvocationEvent::Succeeded);
        assert!(result.is_err());
    }
}
