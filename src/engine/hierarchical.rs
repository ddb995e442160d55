use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

use super::invoker::ResilientInvoker;
use super::{render, settle_all};
use crate::definitions::{AgentRoster, AgentSpec};
use crate::error::{InvocationError, OrchestrationError};
use crate::types::{Prompt, RunId};

pub const ORCHESTRATOR_TEMPLATE: &str = "User goal: {task}\nSplit into two manager-level tasks.";
pub const MANAGER_TEMPLATE: &str = "Manager task: {task}\nProduce 2 worker tasks (one line each).";
pub const WORKER_TEMPLATE: &str = "Worker task: {task}\nPerform task and return a short summary.";

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+•]|\(?\d+[.):]|[A-Za-z][.)])\s+").expect("list marker pattern compiles")
});

/// Turns a parent's normalized text into the tasks handed to its children.
pub trait TaskParser: Send + Sync {
    fn parse(&self, text: &str) -> Vec<String>;
}

/// The whole text is a single task; blank text yields none.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeTextParser;

impl TaskParser for WholeTextParser {
    fn parse(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        }
    }
}

/// One task per non-empty line, with bullet or numbering markers stripped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineParser;

impl TaskParser for LineParser {
    fn parse(&self, text: &str) -> Vec<String> {
        text.lines()
            .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

/// Caps on fan-out per level. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyLimits {
    pub max_managers: Option<usize>,
    pub max_workers: Option<usize>,
}

/// One agent invocation in the tree.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub role: String,
    /// Task assigned by the parent (the goal for the root).
    pub task: String,
    pub prompt: String,
    pub children: Vec<TaskNode>,
    /// `None` when the node never settled.
    pub result: Option<Result<String, InvocationError>>,
}

impl TaskNode {
    fn unsettled(role: &AgentSpec, task: &str) -> Self {
        Self {
            role: role.name.clone(),
            task: task.to_string(),
            prompt: String::new(),
            children: Vec::new(),
            result: None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.result {
            Some(Ok(text)) => Some(text),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&InvocationError> {
        match &self.result {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HierarchicalRun {
    pub run_id: RunId,
    pub tree: TaskNode,
    /// `(manager_index, worker_index)` to worker text, both 0-based.
    pub results: BTreeMap<(usize, usize), String>,
}

enum Fault {
    Invocation(InvocationError),
    Panicked(String),
}

type NodeFault = Option<(String, Fault)>;

#[derive(Clone)]
struct Crew {
    invoker: Arc<ResilientInvoker>,
    manager: Arc<AgentSpec>,
    worker: Arc<AgentSpec>,
    parser: Arc<dyn TaskParser>,
    limits: HierarchyLimits,
}

/// Orchestrator, managers, workers. Each level runs concurrently once its parent answered.
pub struct HierarchicalOrchestrator {
    orchestrator: Arc<AgentSpec>,
    crew: Crew,
}

impl HierarchicalOrchestrator {
    pub fn new(
        invoker: Arc<ResilientInvoker>,
        orchestrator: Arc<AgentSpec>,
        manager: Arc<AgentSpec>,
        worker: Arc<AgentSpec>,
    ) -> Self {
        Self {
            orchestrator,
            crew: Crew {
                invoker,
                manager,
                worker,
                parser: Arc::new(WholeTextParser),
                limits: HierarchyLimits::default(),
            },
        }
    }

    pub fn from_roster(invoker: Arc<ResilientInvoker>, roster: &AgentRoster) -> Result<Self> {
        Ok(Self::new(
            invoker,
            roster.get("orchestrator")?,
            roster.get("manager")?,
            roster.get("worker")?,
        ))
    }

    pub fn with_parser(mut self, parser: Arc<dyn TaskParser>) -> Self {
        self.crew.parser = parser;
        self
    }

    pub fn with_limits(mut self, limits: HierarchyLimits) -> Self {
        self.crew.limits = limits;
        self
    }

    pub async fn run(&self, goal: &str) -> Result<HierarchicalRun, OrchestrationError> {
        if goal.trim().is_empty() {
            return Err(OrchestrationError::Validation("empty goal".to_string()));
        }
        let limits = self.crew.limits;
        if limits.max_managers == Some(0) || limits.max_workers == Some(0) {
            return Err(OrchestrationError::Validation(
                "hierarchy limits must allow at least one child".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        log::info!("Hierarchical run {} started", run_id);

        let mut root = run_node(
            &self.crew.invoker,
            self.orchestrator.clone(),
            ORCHESTRATOR_TEMPLATE,
            goal,
        )
        .await;
        if let Some(source) = root.error().cloned() {
            log::error!("Hierarchical run {} failed at orchestrator: {}", run_id, source);
            return Err(OrchestrationError::NodeFailed {
                node: "orchestrator".to_string(),
                source,
                partial: Box::new(root),
            });
        }

        let tasks = split_tasks(
            self.crew.parser.as_ref(),
            root.text().unwrap_or_default(),
            goal,
            limits.max_managers,
            "orchestrator",
        );

        let handles: Vec<_> = tasks
            .iter()
            .enumerate()
            .map(|(index, task)| {
                let crew = self.crew.clone();
                let task = task.clone();
                tokio::spawn(async move { run_manager(crew, index, task).await })
            })
            .collect();

        let mut fault: NodeFault = None;
        for (index, (task, settled)) in tasks.iter().zip(settle_all(handles).await).enumerate() {
            let (node, node_fault) = match settled {
                Ok(settled) => settled,
                Err(message) => (
                    TaskNode::unsettled(&self.crew.manager, task),
                    Some((format!("manager[{}]", index), Fault::Panicked(message))),
                ),
            };
            if fault.is_none() {
                fault = node_fault;
            }
            root.children.push(node);
        }

        if let Some((node, fault)) = fault {
            log::error!("Hierarchical run {} failed at {}", run_id, node);
            return Err(match fault {
                Fault::Invocation(source) => OrchestrationError::NodeFailed {
                    node,
                    source,
                    partial: Box::new(root),
                },
                Fault::Panicked(message) => OrchestrationError::NodePanicked {
                    node,
                    message,
                    partial: Box::new(root),
                },
            });
        }

        let results: BTreeMap<(usize, usize), String> = root
            .children
            .iter()
            .enumerate()
            .flat_map(|(m, manager)| {
                manager.children.iter().enumerate().map(move |(w, worker)| {
                    ((m, w), worker.text().unwrap_or_default().to_string())
                })
            })
            .collect();

        log::info!(
            "Hierarchical run {} finished: {} managers, {} worker results",
            run_id,
            root.children.len(),
            results.len()
        );

        Ok(HierarchicalRun {
            run_id,
            tree: root,
            results,
        })
    }
}

async fn run_node(
    invoker: &ResilientInvoker,
    agent: Arc<AgentSpec>,
    template: &str,
    task: &str,
) -> TaskNode {
    let prompt = Prompt::new(agent, render(template, &[("task", task)]));
    let result = invoker
        .invoke_keyed(&prompt.scoped_key(), &prompt)
        .await
        .map(|completion| completion.text);

    TaskNode {
        role: prompt.role().to_string(),
        task: task.to_string(),
        prompt: prompt.text().to_string(),
        children: Vec::new(),
        result: Some(result),
    }
}

async fn run_manager(crew: Crew, index: usize, task: String) -> (TaskNode, NodeFault) {
    let path = format!("manager[{}]", index);
    let mut node = run_node(&crew.invoker, crew.manager.clone(), MANAGER_TEMPLATE, &task).await;
    if let Some(source) = node.error().cloned() {
        return (node, Some((path, Fault::Invocation(source))));
    }

    let tasks = split_tasks(
        crew.parser.as_ref(),
        node.text().unwrap_or_default(),
        &task,
        crew.limits.max_workers,
        &path,
    );

    let handles: Vec<_> = tasks
        .iter()
        .map(|worker_task| {
            let invoker = crew.invoker.clone();
            let worker = crew.worker.clone();
            let worker_task = worker_task.clone();
            tokio::spawn(
                async move { run_node(&invoker, worker, WORKER_TEMPLATE, &worker_task).await },
            )
        })
        .collect();

    let mut fault: NodeFault = None;
    for (w, (worker_task, settled)) in tasks.iter().zip(settle_all(handles).await).enumerate() {
        let child = match settled {
            Ok(child) => {
                if let Some(source) = child.error().filter(|_| fault.is_none()) {
                    fault = Some((
                        format!("{}/worker[{}]", path, w),
                        Fault::Invocation(source.clone()),
                    ));
                }
                child
            }
            Err(message) => {
                if fault.is_none() {
                    fault = Some((format!("{}/worker[{}]", path, w), Fault::Panicked(message)));
                }
                TaskNode::unsettled(&crew.worker, worker_task)
            }
        };
        node.children.push(child);
    }

    (node, fault)
}

/// Parse child tasks, falling back to the parent's own task and applying the cap.
fn split_tasks(
    parser: &dyn TaskParser,
    text: &str,
    own_task: &str,
    cap: Option<usize>,
    node: &str,
) -> Vec<String> {
    let mut tasks = parser.parse(text);
    if tasks.is_empty() {
        log::info!("{} produced no tasks; delegating its own task", node);
        tasks.push(own_task.to_string());
    }
    if let Some(cap) = cap {
        if tasks.len() > cap {
            log::warn!("{} produced {} tasks; keeping {}", node, tasks.len(), cap);
            tasks.truncate(cap);
        }
    }
    tasks
}
