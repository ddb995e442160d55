use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::builtin;
use super::schema::AgentSpec;

/// Named agent specs available to the orchestrators.
///
/// Starts from the built-ins; a YAML roster file can replace any of them by name or
/// add new ones.
#[derive(Debug, Clone)]
pub struct AgentRoster {
    specs: HashMap<String, Arc<AgentSpec>>,
}

impl AgentRoster {
    pub fn builtin(model: &str, proposers: usize) -> Self {
        let specs = builtin::all(model, proposers)
            .into_iter()
            .map(|spec| (spec.name.clone(), Arc::new(spec)))
            .collect();
        Self { specs }
    }

    pub fn get(&self, name: &str) -> Result<Arc<AgentSpec>> {
        self.specs
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("No agent named '{}' in roster", name))
    }

    pub fn insert(&mut self, spec: AgentSpec) {
        self.specs.insert(spec.name.clone(), Arc::new(spec));
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Merge specs from a YAML file holding a list of agents.
    pub fn merge_file(&mut self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read roster {}", path.display()))?;
        let count = self.merge_yaml(&raw)?;
        log::info!("Loaded {} agent specs from {}", count, path.display());
        Ok(count)
    }

    pub fn merge_yaml(&mut self, raw: &str) -> Result<usize> {
        let specs: Vec<AgentSpec> =
            serde_yaml::from_str(raw).map_err(|e| anyhow!("Failed to parse roster YAML: {}", e))?;

        for spec in &specs {
            if spec.name.trim().is_empty() {
                return Err(anyhow!("Roster entry with empty name"));
            }
            if spec.instruction.trim().is_empty() {
                return Err(anyhow!("Agent '{}' has an empty instruction", spec.name));
            }
        }

        let count = specs.len();
        for spec in specs {
            self.insert(spec);
        }
        Ok(count)
    }
}
