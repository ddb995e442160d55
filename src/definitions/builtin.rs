use super::schema::{AgentSpec, ToolType};

pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";

pub fn researcher(model: &str) -> AgentSpec {
    AgentSpec::new(
        "researcher",
        model,
        "Researcher: reads prompt & proposes 2 hypotheses.",
        "You are a Researcher. Propose 2 concise hypotheses for the user goal, ranked by feasibility.",
    )
    .with_tools(vec![ToolType::WebSearch])
}

pub fn engineer(model: &str) -> AgentSpec {
    AgentSpec::new(
        "engineer",
        model,
        "Engineer: turns chosen hypothesis into a small experiment plan.",
        "You are an Engineer. Given hypothesis, produce a 3-step experimental plan in runnable pseudocode.",
    )
}

pub fn evaluator(model: &str) -> AgentSpec {
    AgentSpec::new(
        "evaluator",
        model,
        "Evaluator: evaluates results and gives verdict.",
        "You are an Evaluator. Given results summary, state whether hypothesis is supported and why.",
    )
    .with_tools(vec![ToolType::AddNumbers, ToolType::ExtractNumber])
}

/// Researcher used by the parallel topology: one hypothesis per seed.
pub fn hypothesis_researcher(model: &str) -> AgentSpec {
    AgentSpec::new(
        "hypothesis_researcher",
        model,
        "Researcher agent for parallel exploration.",
        "Propose one hypothesis for the provided goal and a 1-line rationale.",
    )
}

pub fn plan_engineer(model: &str) -> AgentSpec {
    AgentSpec::new(
        "plan_engineer",
        model,
        "Engineer converts hypothesis to runnable plan.",
        "Given a hypothesis, produce a tiny plan in steps.",
    )
}

pub fn orchestrator(model: &str) -> AgentSpec {
    AgentSpec::new(
        "orchestrator",
        model,
        "Top-level orchestrator to assign managers.",
        "You are the Orchestrator. Split a user goal into two managerial tasks and assign them.",
    )
}

pub fn manager(model: &str) -> AgentSpec {
    AgentSpec::new(
        "manager",
        model,
        "Manager: splits tasks to workers and aggregates.",
        "You are a Manager. Given your assigned task, produce two worker tasks and how to aggregate results.",
    )
}

pub fn worker(model: &str) -> AgentSpec {
    AgentSpec::new(
        "worker",
        model,
        "Worker: performs a focused subtask.",
        "You are a Worker. Perform the small task and return a short result.",
    )
    .with_tools(vec![ToolType::AddNumbers, ToolType::WeatherLookup, ToolType::WebSearch])
}

/// Proposers are numbered from 1 so their names stay distinct in cache keys.
pub fn proposer(index: usize, model: &str) -> AgentSpec {
    AgentSpec::new(
        format!("proposer_{}", index),
        model,
        format!("Proposer agent {}", index),
        "Propose one concise solution for the prompt with a one-line rationale.",
    )
}

pub fn judge(model: &str) -> AgentSpec {
    AgentSpec::new(
        "judge",
        model,
        "Judge: ranks and picks best proposal",
        "You are a Judge. Rank the provided proposals and choose the best with a short justification.",
    )
}

/// Single-prompt assistant answering `ask` requests.
pub fn assistant(model: &str) -> AgentSpec {
    AgentSpec::new(
        "assistant",
        model,
        "Research assistant that analyzes and cross-references knowledge from online sources.",
        "You are a research assistant. Provide structured, well-cited, context-aware responses. When searching the web, prioritize credible sources and synthesize findings clearly.",
    )
    .with_tools(vec![ToolType::WebSearch])
}

/// Runs every stage of the chained search workflow.
pub fn analyst(model: &str) -> AgentSpec {
    AgentSpec::new(
        "analyst",
        model,
        "Analyst chaining search, metric extraction and synthesis.",
        "You are a careful AI assistant. When calling tools, validate inputs, prefer cached results when available, and always return structured summaries.",
    )
    .with_tools(vec![ToolType::AddNumbers, ToolType::ExtractNumber, ToolType::WebSearch])
}

/// Every built-in spec, with `proposers` proposer agents.
pub fn all(model: &str, proposers: usize) -> Vec<AgentSpec> {
    let mut specs = vec![
        researcher(model),
        engineer(model),
        evaluator(model),
        hypothesis_researcher(model),
        plan_engineer(model),
        orchestrator(model),
        manager(model),
        worker(model),
        judge(model),
        assistant(model),
        analyst(model),
    ];
    specs.extend((1..=proposers).map(|i| proposer(i, model)));
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_unique() {
        let specs = all(DEFAULT_MODEL, 3);
        let mut names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), specs.len());
    }

    #[test]
    fn test_proposers_are_numbered_from_one() {
        let spec = proposer(1, "m");
        assert_eq!(spec.name, "proposer_1");
        assert_eq!(spec.model, "m");
        assert!(spec.tools.is_empty());
    }

    #[test]
    fn test_worker_declares_tools() {
        let spec = worker(DEFAULT_MODEL);
        assert!(spec.tools.contains(&ToolType::WebSearch));
    }
}
