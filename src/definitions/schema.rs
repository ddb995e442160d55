use serde::{Deserialize, Serialize};

/// A configured agent: model, description, instruction and declared tools.
///
/// Specs are created once at startup and shared behind `Arc`; nothing mutates them
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub description: String,
    pub instruction: String,

    /// Descriptive only. Tools are recorded on the agent for rosters and reports,
    /// and no provider sends them as function declarations.
    #[serde(default)]
    pub tools: Vec<ToolType>,
}

impl AgentSpec {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        description: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            description: description.into(),
            instruction: instruction.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolType>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    AddNumbers,
    ExtractNumber,
    WeatherLookup,
    WebSearch,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::AddNumbers => "add_numbers",
            ToolType::ExtractNumber => "extract_number",
            ToolType::WeatherLookup => "weather_lookup",
            ToolType::WebSearch => "web_search",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "add_numbers" => Some(ToolType::AddNumbers),
            "extract_number" => Some(ToolType::ExtractNumber),
            "weather_lookup" => Some(ToolType::WeatherLookup),
            "web_search" => Some(ToolType::WebSearch),
            _ => None,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            ToolType::AddNumbers,
            ToolType::ExtractNumber,
            ToolType::WeatherLookup,
            ToolType::WebSearch,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_serialization() {
        let spec = AgentSpec::new(
            "researcher",
            "gemini-2.5-pro",
            "Researcher",
            "Propose hypotheses.",
        )
        .with_tools(vec![ToolType::WebSearch, ToolType::AddNumbers]);

        let json = serde_json::to_string(&spec).unwrap();
        let deserialized: AgentSpec = serde_json::from_str(&json).unwrap();

        assert_eq!(spec, deserialized);
        assert!(json.contains("\"web_search\""));
    }

    #[test]
    fn test_tool_type_round_trips_through_str() {
        for tool in ToolType::all() {
            assert_eq!(ToolType::from_str(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolType::from_str("spawn_agent"), None);
    }
}
