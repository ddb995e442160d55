use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendFailure;
use crate::normalize::ResponseNormalizer;
use crate::types::{Event, InvocationConfig, Prompt, Response};

/// Normalized chunks of one response, in order.
pub type TextChunks = BoxStream<'static, Result<String, BackendFailure>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// System instruction of the issuing agent followed by the prompt text.
    pub fn for_prompt(prompt: &Prompt) -> Vec<Message> {
        vec![Message::system(prompt.instruction()), Message::user(prompt.text())]
    }
}

/// The external generative capability.
#[async_trait]
pub trait InvocationClient: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        prompt: &Prompt,
        config: &InvocationConfig,
    ) -> Result<Response, BackendFailure>;

    /// Turn any response shape into normalized text chunks.
    fn drain(&self, response: Response, normalizer: ResponseNormalizer) -> TextChunks {
        drain(response, normalizer)
    }
}

/// Lazily normalize a response. A stream response consumes its only source.
pub fn drain(response: Response, normalizer: ResponseNormalizer) -> TextChunks {
    match response {
        Response::Text(text) => {
            stream::once(futures::future::ready(Ok(normalizer.normalize_text(&text)))).boxed()
        }
        Response::EventList(events) => stream::iter(
            events
                .into_iter()
                .map(move |event| Ok(normalizer.normalize_event(&event))),
        )
        .boxed(),
        Response::EventStream(events) => events
            .map(move |item| item.map(|event| normalizer.normalize_event(&event)))
            .boxed(),
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    model: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<Value>,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: None,
            client: reqwest::Client::new(),
        }
    }

    /// Use this model for every agent instead of the agent's own.
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }
}

#[async_trait]
impl InvocationClient for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(
        &self,
        prompt: &Prompt,
        _config: &InvocationConfig,
    ) -> Result<Response, BackendFailure> {
        let request = AnthropicRequest {
            model: self
                .model
                .clone()
                .unwrap_or_else(|| prompt.agent().model.clone()),
            messages: vec![Message::user(prompt.text())],
            max_tokens: 4096,
            system: Some(prompt.instruction().to_string()),
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendFailure::status(status.as_u16(), body));
        }

        let result: AnthropicResponse = response.json().await?;
        let events = result
            .content
            .into_iter()
            .map(|block| content_block_event(block, prompt.role()))
            .collect();

        Ok(Response::EventList(events))
    }
}

fn content_block_event(block: Value, author: &str) -> Event {
    match block.get("text").and_then(Value::as_str) {
        Some(text) => Event::text(text).with_author(author),
        None => Event {
            author: Some(author.to_string()),
            content: None,
            fields: match block {
                Value::Object(map) => map,
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("block".to_string(), other);
                    map
                }
            },
        },
    }
}

#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    api_key: String,
    model: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

impl OpenAIProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }
}

#[async_trait]
impl InvocationClient for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn invoke(
        &self,
        prompt: &Prompt,
        _config: &InvocationConfig,
    ) -> Result<Response, BackendFailure> {
        let request = OpenAIRequest {
            model: self
                .model
                .clone()
                .unwrap_or_else(|| prompt.agent().model.clone()),
            messages: Message::for_prompt(prompt),
            max_tokens: Some(4096),
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendFailure::status(status.as_u16(), body));
        }

        let result: OpenAIResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .map(|choice| Response::Text(choice.message.content.unwrap_or_default()))
            .ok_or_else(|| BackendFailure::Decode("No choices in response".to_string()))
    }
}
