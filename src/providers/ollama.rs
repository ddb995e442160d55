use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::error::BackendFailure;
use crate::providers::llm::{InvocationClient, Message};
use crate::types::{Event, EventStream, InvocationConfig, Prompt, Response};

/// Streams `/api/chat` as newline-delimited JSON, one event per line.
pub struct OllamaProvider {
    base_url: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl InvocationClient for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
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
            .post(format!("{}/api/chat", self.base_url))
            .json(&json!({
                "model": model,
                "messages": Message::for_prompt(prompt),
                "stream": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendFailure::status(status.as_u16(), body));
        }

        Ok(Response::EventStream(ndjson_events(response)))
    }
}

fn ndjson_events(response: reqwest::Response) -> EventStream {
    let events = stream! {
        let mut bytes = Box::pin(response.bytes_stream());
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(e) => {
                    yield Err(BackendFailure::from(e));
                    return;
                }
            }

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                match parse_chat_line(&line) {
                    Ok(Some(event)) => yield Ok(event),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        match parse_chat_line(&buffer) {
            Ok(Some(event)) => yield Ok(event),
            Ok(None) => {}
            Err(e) => yield Err(e),
        }
    };

    Box::pin(events)
}

fn parse_chat_line(line: &[u8]) -> Result<Option<Event>, BackendFailure> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let body: Value = serde_json::from_str(line)?;
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        return Err(BackendFailure::Transport(format!("ollama: {}", error)));
    }

    let text = body["message"]["content"].as_str().unwrap_or_default();
    let role = body["message"]["role"].as_str().unwrap_or("assistant");
    let done = body["done"].as_bool().unwrap_or(false);

    Ok(Some(
        Event::text(text)
            .with_author(role)
            .with_field("done", Value::Bool(done)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_provider_creation() {
        let provider = OllamaProvider::new(None, Some("llama3.1".to_string()));
        assert_eq!(provider.model.as_deref(), Some("llama3.1"));
        assert_eq!(provider.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_parse_chat_line() {
        let event = parse_chat_line(
            br#"{"model":"llama3.1","message":{"role":"assistant","content":"Hel"},"done":false}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.author.as_deref(), Some("assistant"));
        assert_eq!(event.fields["done"], Value::Bool(false));

        assert!(parse_chat_line(b"   \n").unwrap().is_none());
    }

    #[test]
    fn test_parse_chat_line_errors() {
        assert!(matches!(
            parse_chat_line(br#"{"error":"model not found"}"#),
            Err(BackendFailure::Transport(_))
        ));
        assert!(matches!(
            parse_chat_line(b"{not json"),
            Err(BackendFailure::Decode(_))
        ));
    }
}
