use anyhow::Result;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

use super::invoker::{Completion, ResilientInvoker};
use super::render;
use crate::definitions::{AgentRoster, AgentSpec};
use crate::error::{InvocationError, OrchestrationError};
use crate::types::{Prompt, RunId};

pub const SEARCH_TEMPLATE: &str = "Search the web for the latest concise summary about: {query}\nReturn a short 3-sentence summary with bullet points if possible.";
pub const EXTRACT_TEMPLATE: &str =
    "From the following text, extract the first numeric value you can find, and return it only:\n\n{summary}";
pub const PARSE_TEMPLATE: &str = "Extract number from: {extracted}";
pub const SYNTHESIS_TEMPLATE: &str = "You are an assistant that synthesizes findings. Based on the search summary and extracted metric, produce a short, structured final answer for the user.\n\nSEARCH SUMMARY:\n{summary}\n\nEXTRACTED_METRIC:\n{metric}";

/// Stands in for the metric when extraction failed.
pub const MISSING_METRIC: &str = "unavailable";

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d*\.?\d+").expect("number pattern compiles"));

/// First number in `text`, if any.
pub fn extract_number(text: &str) -> Option<f64> {
    NUMBER.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Cache key under which the search summary for `query` is kept.
pub fn search_key(query: &str) -> String {
    format!("search:{}", query)
}

/// Send one prompt to `agent` and return its normalized text.
///
/// Keyed by agent and prompt text, so asking the same thing twice hits the cache.
pub async fn ask(
    invoker: &ResilientInvoker,
    agent: Arc<AgentSpec>,
    text: &str,
) -> Result<Completion, InvocationError> {
    let prompt = Prompt::new(agent, text);
    invoker.invoke_keyed(&prompt.scoped_key(), &prompt).await
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Reply to the extraction prompt.
    pub extracted: String,
    /// Reply to the number-parsing prompt.
    pub parsed: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ChainedRun {
    pub run_id: RunId,
    pub query: String,
    pub summary: String,
    /// The summary came from the `search:` cache entry.
    pub summary_cached: bool,
    /// An extraction failure is kept here; the synthesis ran without it.
    pub metric: Result<Metric, InvocationError>,
    pub synthesis_prompt: String,
    pub answer: String,
}

impl ChainedRun {
    pub fn value(&self) -> Option<f64> {
        self.metric.as_ref().ok().and_then(|metric| metric.value)
    }
}

/// Search, extract a metric, synthesize. Only the middle stage may fail softly.
pub struct ChainedWorkflow {
    invoker: Arc<ResilientInvoker>,
    analyst: Arc<AgentSpec>,
}

impl ChainedWorkflow {
    pub fn new(invoker: Arc<ResilientInvoker>, analyst: Arc<AgentSpec>) -> Self {
        Self { invoker, analyst }
    }

    pub fn from_roster(invoker: Arc<ResilientInvoker>, roster: &AgentRoster) -> Result<Self> {
        Ok(Self::new(invoker, roster.get("analyst")?))
    }

    pub async fn run(&self, query: &str) -> Result<ChainedRun, OrchestrationError> {
        if query.trim().is_empty() {
            return Err(OrchestrationError::Validation("empty query".to_string()));
        }

        let run_id = Uuid::new_v4();
        log::info!("Chained run {} started for: {}", run_id, query);

        let search = Prompt::new(
            self.analyst.clone(),
            render(SEARCH_TEMPLATE, &[("query", query)]),
        );
        let summary = self
            .invoker
            .invoke_keyed(&search_key(query), &search)
            .await
            .map_err(|source| {
                log::error!("Chained run {} failed at search: {}", run_id, source);
                OrchestrationError::StageFailed {
                    stage: "search",
                    source,
                }
            })?;
        if summary.cached {
            log::info!("Chained run {}: using cached search result", run_id);
        }

        let metric = self.extract_metric(&summary.text).await;
        let metric_text = match &metric {
            Ok(metric) => {
                log::info!("Chained run {}: metric {:?}", run_id, metric.parsed);
                metric.parsed.as_str()
            }
            Err(source) => {
                log::warn!(
                    "Chained run {}: failed to extract numeric metric: {}",
                    run_id,
                    source
                );
                MISSING_METRIC
            }
        };

        let synthesis_prompt = render(
            SYNTHESIS_TEMPLATE,
            &[("summary", summary.text.as_str()), ("metric", metric_text)],
        );
        let answer = ask(&self.invoker, self.analyst.clone(), &synthesis_prompt)
            .await
            .map_err(|source| {
                log::error!("Chained run {} failed at synthesis: {}", run_id, source);
                OrchestrationError::StageFailed {
                    stage: "synthesis",
                    source,
                }
            })?;

        log::info!("Chained run {} finished", run_id);
        Ok(ChainedRun {
            run_id,
            query: query.to_string(),
            summary: summary.text,
            summary_cached: summary.cached,
            metric,
            synthesis_prompt,
            answer: answer.text,
        })
    }

    async fn extract_metric(&self, summary: &str) -> Result<Metric, InvocationError> {
        let extracted = ask(
            &self.invoker,
            self.analyst.clone(),
            &render(EXTRACT_TEMPLATE, &[("summary", summary)]),
        )
        .await?
        .text;
        let parsed = ask(
            &self.invoker,
            self.analyst.clone(),
            &render(PARSE_TEMPLATE, &[("extracted", extracted.as_str())]),
        )
        .await?
        .text;

        Ok(Metric {
            value: extract_number(&parsed),
            extracted,
            parsed,
        })
    }
}
