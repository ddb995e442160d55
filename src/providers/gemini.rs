use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::BackendFailure;
use crate::providers::llm::InvocationClient;
use crate::types::{Content, Event, InvocationConfig, Prompt, Response};

/// Gemini `generateContent`; each candidate becomes one event.
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    model: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn request_body(prompt: &Prompt) -> Value {
        json!({
            "systemInstruction": { "parts": [{ "text": prompt.instruction() }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt.text() }] }],
        })
    }
}

#[async_trait]
impl InvocationClient for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn invoke(
        &self,
        prompt: &Prompt,
        _config: &InvocationConfig,
    ) -> Result<Response, BackendFailure> {
        let model = self
            .model
            .clone()
            .unwrap_or_else(|| prompt.agent().model.clone());

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendFailure::status(status.as_u16(), body));
        }

        let body: GenerateContentResponse = response.json().await?;
        Ok(Response::EventList(candidate_events(body, prompt.role())))
    }
}

fn candidate_events(body: GenerateContentResponse, author: &str) -> Vec<Event> {
    body.candidates
        .into_iter()
        .map(|candidate| Event {
            author: Some(author.to_string()),
            content: candidate.content,
            fields: candidate.rest,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{AgentSpec, ToolType};
    use crate::normalize::ResponseNormalizer;
    use std::sync::Arc;

    #[test]
    fn test_request_body_carries_instruction() {
        let prompt = Prompt::new(
            Arc::new(AgentSpec::new("judge", "gemini-2.5-pro", "", "Rank them.")),
            "1. A",
        );
        let body = GeminiProvider::request_body(&prompt);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Rank them.");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "1. A");
    }

    #[test]
    fn test_declared_tools_stay_out_of_request() {
        let agent = AgentSpec::new("researcher", "gemini-2.5-pro", "", "Search.")
            .with_tools(vec![ToolType::WebSearch, ToolType::ExtractNumber]);
        let body = GeminiProvider::request_body(&Prompt::new(Arc::new(agent), "find it"));

        let keys: Vec<&String> = body.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_candidates_become_events() {
        let body: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {
                    "content": { "role": "model", "parts": [{ "text": "Proposal A" }] },
                    "finishReason": "STOP"
                },
                { "finishReason": "SAFETY" }
            ]
        }))
        .unwrap();

        let events = candidate_events(body, "proposer_1");
        let normalizer = ResponseNormalizer::default();

        assert_eq!(events.len(), 2);
        assert_eq!(normalizer.normalize_event(&events[0]), "Proposal A");
        assert_eq!(events[1].fields["finishReason"], "SAFETY");
    }

    #[test]
    fn test_gemini_provider_creation() {
        let provider = GeminiProvider::new("k".to_string()).with_model("gemini-2.5-flash-lite".to_string());
        assert_eq!(provider.model.as_deref(), Some("gemini-2.5-flash-lite"));
        assert_eq!(provider.base_url, "https://generativelanguage.googleapis.com");
    }
}
