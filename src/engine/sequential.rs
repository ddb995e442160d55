use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use super::invoker::ResilientInvoker;
use super::render;
use crate::definitions::{AgentRoster, AgentSpec};
use crate::error::OrchestrationError;
use crate::types::{Prompt, RunId};

pub const RESEARCH_TEMPLATE: &str = "User goal: {input}\nPropose 2 hypotheses, rank by feasibility.";
pub const ENGINEER_TEMPLATE: &str =
    "Hypotheses:\n{previous}\nChoose hypothesis #1 and create a 3-step experiment plan (pseudocode).";
pub const EVALUATOR_TEMPLATE: &str =
    "Experiment plan:\n{previous}\nJudge whether the hypothesis is supported and why.";

/// One stage of a pipeline.
///
/// `{input}` expands to the run input, `{previous}` to the prior step's text (the run
/// input for the first step).
#[derive(Debug, Clone)]
pub struct SequentialStep {
    pub agent: Arc<AgentSpec>,
    pub template: String,
}

impl SequentialStep {
    pub fn new(agent: Arc<AgentSpec>, template: impl Into<String>) -> Self {
        Self {
            agent,
            template: template.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub role: String,
    pub prompt: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct SequentialRun {
    pub run_id: RunId,
    pub steps: Vec<StepOutput>,
}

impl SequentialRun {
    /// Text of the last step.
    pub fn output(&self) -> Option<&str> {
        self.steps.last().map(|step| step.text.as_str())
    }
}

pub struct SequentialOrchestrator {
    invoker: Arc<ResilientInvoker>,
    steps: Vec<SequentialStep>,
}

impl SequentialOrchestrator {
    pub fn new(invoker: Arc<ResilientInvoker>, steps: Vec<SequentialStep>) -> Self {
        Self { invoker, steps }
    }

    /// Researcher, engineer, evaluator.
    pub fn research_pipeline(invoker: Arc<ResilientInvoker>, roster: &AgentRoster) -> Result<Self> {
        let steps = vec![
            SequentialStep::new(roster.get("researcher")?, RESEARCH_TEMPLATE),
            SequentialStep::new(roster.get("engineer")?, ENGINEER_TEMPLATE),
            SequentialStep::new(roster.get("evaluator")?, EVALUATOR_TEMPLATE),
        ];
        Ok(Self::new(invoker, steps))
    }

    pub fn steps(&self) -> &[SequentialStep] {
        &self.steps
    }

    pub async fn run(&self, input: &str) -> Result<SequentialRun, OrchestrationError> {
        if self.steps.is_empty() {
            return Err(OrchestrationError::Validation(
                "sequential pipeline has no steps".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        log::info!(
            "Sequential run {} started with {} steps",
            run_id,
            self.steps.len()
        );

        let mut completed: Vec<StepOutput> = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            let previous = completed
                .last()
                .map(|output| output.text.as_str())
                .unwrap_or(input);
            let text = render(&step.template, &[("input", input), ("previous", previous)]);
            let prompt = Prompt::new(step.agent.clone(), text);

            match self.invoker.invoke_keyed(&prompt.scoped_key(), &prompt).await {
                Ok(completion) => {
                    log::debug!("Step {} ({}) done", index, prompt.role());
                    completed.push(StepOutput {
                        role: prompt.role().to_string(),
                        prompt: prompt.text().to_string(),
                        text: completion.text,
                    });
                }
                Err(source) => {
                    log::error!(
                        "Sequential run {} aborted at step {} ({}): {}",
                        run_id,
                        index,
                        prompt.role(),
                        source
                    );
                    return Err(OrchestrationError::StepFailed {
                        step: index,
                        role: prompt.role().to_string(),
                        source,
                        completed,
                    });
                }
            }
        }

        log::info!("Sequential run {} finished", run_id);
        Ok(SequentialRun {
            run_id,
            steps: completed,
        })
    }
}
