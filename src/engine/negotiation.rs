use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use super::invoker::ResilientInvoker;
use super::{render, settle_all};
use crate::definitions::{AgentRoster, AgentSpec};
use crate::error::{BranchFailure, OrchestrationError};
use crate::types::{Prompt, RunId};

pub const PROPOSER_TEMPLATE: &str = "Prompt: {prompt}\nPropose one candidate solution.";
pub const JUDGE_PREAMBLE: &str = "Rank these proposals and pick the best. Proposals:\n";

#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub proposer: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct NegotiationRun {
    pub run_id: RunId,
    /// Successful proposals, in proposer order.
    pub proposals: Vec<Proposal>,
    pub failures: Vec<(String, BranchFailure)>,
    pub judge_prompt: String,
    pub verdict: String,
}

/// Proposers answer the same prompt in parallel; a judge ranks whatever came back.
pub struct NegotiationOrchestrator {
    invoker: Arc<ResilientInvoker>,
    proposers: Vec<Arc<AgentSpec>>,
    judge: Arc<AgentSpec>,
}

impl NegotiationOrchestrator {
    pub fn new(
        invoker: Arc<ResilientInvoker>,
        proposers: Vec<Arc<AgentSpec>>,
        judge: Arc<AgentSpec>,
    ) -> Self {
        Self {
            invoker,
            proposers,
            judge,
        }
    }

    /// `proposer_1` through `proposer_{count}` plus `judge`.
    pub fn from_roster(
        invoker: Arc<ResilientInvoker>,
        roster: &AgentRoster,
        count: usize,
    ) -> Result<Self> {
        let proposers = (1..=count)
            .map(|i| roster.get(&format!("proposer_{}", i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(invoker, proposers, roster.get("judge")?))
    }

    pub async fn run(&self, prompt: &str) -> Result<NegotiationRun, OrchestrationError> {
        if self.proposers.is_empty() {
            return Err(OrchestrationError::Validation(
                "negotiation needs at least one proposer".to_string(),
            ));
        }
        if prompt.trim().is_empty() {
            return Err(OrchestrationError::Validation("empty prompt".to_string()));
        }

        let run_id = Uuid::new_v4();
        log::info!(
            "Negotiation run {} started with {} proposers",
            run_id,
            self.proposers.len()
        );

        let text = render(PROPOSER_TEMPLATE, &[("prompt", prompt)]);
        let handles: Vec<_> = self
            .proposers
            .iter()
            .map(|proposer| {
                let invoker = self.invoker.clone();
                let prompt = Prompt::new(proposer.clone(), text.clone());
                tokio::spawn(async move {
                    invoker
                        .invoke_keyed(&prompt.scoped_key(), &prompt)
                        .await
                        .map(|completion| completion.text)
                })
            })
            .collect();

        let mut proposals = Vec::new();
        let mut failures = Vec::new();
        for (proposer, settled) in self.proposers.iter().zip(settle_all(handles).await) {
            let outcome = match settled {
                Ok(result) => result.map_err(|source| BranchFailure::Invocation {
                    stage: "propose",
                    source,
                }),
                Err(message) => Err(BranchFailure::Panicked(message)),
            };
            match outcome {
                Ok(text) => proposals.push(Proposal {
                    proposer: proposer.name.clone(),
                    text,
                }),
                Err(failure) => {
                    log::warn!(
                        "Negotiation run {}: {} failed: {}",
                        run_id,
                        proposer.name,
                        failure
                    );
                    failures.push((proposer.name.clone(), failure));
                }
            }
        }

        if proposals.is_empty() {
            log::error!("Negotiation run {}: no proposals to judge", run_id);
            return Err(OrchestrationError::NoProposals { failures });
        }

        let judge_prompt = judge_prompt(&proposals);
        let prompt = Prompt::new(self.judge.clone(), judge_prompt.clone());
        let verdict = match self.invoker.invoke_keyed(&prompt.scoped_key(), &prompt).await {
            Ok(completion) => completion.text,
            Err(source) => {
                log::error!("Negotiation run {}: judge failed: {}", run_id, source);
                return Err(OrchestrationError::JudgeFailed { source, proposals });
            }
        };

        log::info!(
            "Negotiation run {} finished: {} proposals judged, {} failed",
            run_id,
            proposals.len(),
            failures.len()
        );

        Ok(NegotiationRun {
            run_id,
            proposals,
            failures,
            judge_prompt,
            verdict,
        })
    }
}

/// Judge prompt with the proposals enumerated from 1.
pub fn judge_prompt(proposals: &[Proposal]) -> String {
    let listing = proposals
        .iter()
        .enumerate()
        .map(|(i, proposal)| format!("{}. {}", i + 1, proposal.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}{}", JUDGE_PREAMBLE, listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendFailure;
    use crate::providers::ScriptedClient;
    use crate::storage::InMemoryCache;
    use crate::types::{InvocationConfig, Response};

    fn orchestrator(client: Arc<ScriptedClient>, count: usize) -> NegotiationOrchestrator {
        let invoker = Arc::new(ResilientInvoker::new(
            client,
            Arc::new(InMemoryCache::new()),
            InvocationConfig::default().with_initial_delay(0.0),
        ));
        NegotiationOrchestrator::from_roster(invoker, &AgentRoster::builtin("m", count), count)
            .unwrap()
    }

    fn letter(role: &str) -> &'static str {
        match role {
            "proposer_1" => "A",
            "proposer_2" => "B",
            "proposer_3" => "C",
            _ => "?",
        }
    }

    #[tokio::test]
    async fn test_judge_sees_enumerated_proposals() {
        let client = Arc::new(ScriptedClient::new(|prompt, _| {
            let text = match prompt.role() {
                "judge" => "2 is best".to_string(),
                role => letter(role).to_string(),
            };
            Ok(Response::Text(text))
        }));
        let negotiation = orchestrator(client.clone(), 3);

        let run = negotiation.run("improve activation").await.unwrap();

        assert!(run.judge_prompt.contains("1. A"));
        assert!(run.judge_prompt.contains("2. B"));
        assert!(run.judge_prompt.contains("3. C"));
        assert_eq!(run.verdict, "2 is best");
        assert_eq!(client.issued_to("judge"), vec![run.judge_prompt.clone()]);
        // Identical proposer prompts must not collapse into one cached answer.
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_proposer_is_skipped() {
        let client = Arc::new(ScriptedClient::new(|prompt, _| match prompt.role() {
            "proposer_2" => Err(BackendFailure::status(404, "gone")),
            "judge" => Ok(Response::Text("verdict".to_string())),
            role => Ok(Response::Text(letter(role).to_string())),
        }));
        let negotiation = orchestrator(client.clone(), 3);

        let run = negotiation.run("p").await.unwrap();

        assert_eq!(run.proposals.len(), 2);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].0, "proposer_2");
        assert!(run.judge_prompt.ends_with("1. A\n2. C"));
    }

    #[tokio::test]
    async fn test_no_proposals_skips_judge() {
        let client = Arc::new(ScriptedClient::new(|_, _| {
            Err(BackendFailure::Transport("refused".to_string()))
        }));
        let negotiation = orchestrator(client.clone(), 2);

        let err = negotiation.run("p").await.unwrap_err();
        match err {
            OrchestrationError::NoProposals { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(client.issued_to("judge").is_empty());
    }

    #[tokio::test]
    async fn test_judge_failure_keeps_proposals() {
        let client = Arc::new(ScriptedClient::new(|prompt, _| match prompt.role() {
            "judge" => Err(BackendFailure::status(400, "too long")),
            role => Ok(Response::Text(letter(role).to_string())),
        }));
        let negotiation = orchestrator(client, 3);

        match negotiation.run("p").await.unwrap_err() {
            OrchestrationError::JudgeFailed { proposals, .. } => assert_eq!(proposals.len(), 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_judge_prompt_format() {
        let proposals = vec![
            Proposal {
                proposer: "proposer_1".to_string(),
                text: "A".to_string(),
            },
            Proposal {
                proposer: "proposer_2".to_string(),
                text: "B".to_string(),
            },
        ];
        assert_eq!(
            judge_prompt(&proposals),
            "Rank these proposals and pick the best. Proposals:\n1. A\n2. B"
        );
    }
}
