use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use super::invoker::ResilientInvoker;
use super::{render, settle_all};
use crate::definitions::{AgentRoster, AgentSpec};
use crate::error::{BranchFailure, OrchestrationError};
use crate::types::{Prompt, RunId};

pub const HYPOTHESIS_TEMPLATE: &str = "Goal: {goal}\nSeed: {seed}\nPropose one hypothesis.";
pub const PLAN_TEMPLATE: &str = "Hypothesis: {hypothesis}\nProduce 2-step plan.";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub hypothesis: String,
    pub plan: String,
}

#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub seed: u64,
    pub result: Result<PipelineOutput, BranchFailure>,
}

#[derive(Debug, Clone)]
pub struct ParallelRun {
    pub run_id: RunId,
    /// One outcome per seed, ascending by seed.
    pub branches: Vec<BranchOutcome>,
}

impl ParallelRun {
    pub fn get(&self, seed: u64) -> Option<&BranchOutcome> {
        self.branches.iter().find(|branch| branch.seed == seed)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (u64, &PipelineOutput)> {
        self.branches
            .iter()
            .filter_map(|branch| branch.result.as_ref().ok().map(|out| (branch.seed, out)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (u64, &BranchFailure)> {
        self.branches
            .iter()
            .filter_map(|branch| branch.result.as_ref().err().map(|err| (branch.seed, err)))
    }
}

/// One hypothesis-then-plan pipeline per seed, all running at once.
pub struct ParallelOrchestrator {
    invoker: Arc<ResilientInvoker>,
    researcher: Arc<AgentSpec>,
    engineer: Arc<AgentSpec>,
}

impl ParallelOrchestrator {
    pub fn new(
        invoker: Arc<ResilientInvoker>,
        researcher: Arc<AgentSpec>,
        engineer: Arc<AgentSpec>,
    ) -> Self {
        Self {
            invoker,
            researcher,
            engineer,
        }
    }

    pub fn from_roster(invoker: Arc<ResilientInvoker>, roster: &AgentRoster) -> Result<Self> {
        Ok(Self::new(
            invoker,
            roster.get("hypothesis_researcher")?,
            roster.get("plan_engineer")?,
        ))
    }

    pub async fn run(&self, goal: &str, seeds: &[u64]) -> Result<ParallelRun, OrchestrationError> {
        if seeds.is_empty() {
            return Err(OrchestrationError::Validation(
                "parallel run needs at least one seed".to_string(),
            ));
        }
        let mut seeds = seeds.to_vec();
        seeds.sort_unstable();
        if let Some(pair) = seeds.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(OrchestrationError::Validation(format!(
                "duplicate seed {}",
                pair[0]
            )));
        }

        let run_id = Uuid::new_v4();
        log::info!(
            "Parallel run {} started with {} branches",
            run_id,
            seeds.len()
        );

        let handles: Vec<_> = seeds
            .iter()
            .map(|&seed| {
                let invoker = self.invoker.clone();
                let researcher = self.researcher.clone();
                let engineer = self.engineer.clone();
                let goal = goal.to_string();
                tokio::spawn(
                    async move { run_branch(&invoker, researcher, engineer, &goal, seed).await },
                )
            })
            .collect();

        let branches: Vec<BranchOutcome> = seeds
            .iter()
            .zip(settle_all(handles).await)
            .map(|(&seed, settled)| {
                let result = settled.unwrap_or_else(|message| Err(BranchFailure::Panicked(message)));
                if let Err(failure) = &result {
                    log::warn!("Parallel run {} branch {} failed: {}", run_id, seed, failure);
                }
                BranchOutcome { seed, result }
            })
            .collect();

        log::info!(
            "Parallel run {} finished: {}/{} branches succeeded",
            run_id,
            branches.iter().filter(|b| b.result.is_ok()).count(),
            branches.len()
        );

        Ok(ParallelRun { run_id, branches })
    }
}

async fn run_branch(
    invoker: &ResilientInvoker,
    researcher: Arc<AgentSpec>,
    engineer: Arc<AgentSpec>,
    goal: &str,
    seed: u64,
) -> Result<PipelineOutput, BranchFailure> {
    let seed_text = seed.to_string();
    let prompt = Prompt::new(
        researcher,
        render(HYPOTHESIS_TEMPLATE, &[("goal", goal), ("seed", &seed_text)]),
    );
    let hypothesis = invoker
        .invoke_keyed(&prompt.scoped_key(), &prompt)
        .await
        .map_err(|source| BranchFailure::Invocation {
            stage: "hypothesis",
            source,
        })?
        .text;

    let prompt = Prompt::new(
        engineer,
        render(PLAN_TEMPLATE, &[("hypothesis", &hypothesis)]),
    );
    let plan = invoker
        .invoke_keyed(&prompt.scoped_key(), &prompt)
        .await
        .map_err(|source| BranchFailure::Invocation {
            stage: "plan",
            source,
        })?
        .text;

    Ok(PipelineOutput { hypothesis, plan })
}
