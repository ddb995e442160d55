use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::BackendFailure;
use crate::providers::llm::InvocationClient;
use crate::types::{InvocationConfig, Prompt, Response};

type Script = Box<dyn Fn(&Prompt, u32) -> Result<Response, BackendFailure> + Send + Sync>;

/// Offline capability driven by a closure.
///
/// The closure receives the prompt and the 1-based call number across all callers.
/// Every issued prompt is recorded as `(role, text)`.
pub struct ScriptedClient {
    script: Script,
    latency: Option<Duration>,
    calls: AtomicU32,
    issued: Mutex<Vec<(String, String)>>,
}

impl ScriptedClient {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Prompt, u32) -> Result<Response, BackendFailure> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            latency: None,
            calls: AtomicU32::new(0),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same text.
    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(Response::Text(text.clone())))
    }

    /// Answers with the role and prompt text it was given.
    pub fn echo() -> Self {
        Self::new(|prompt, _| Ok(Response::Text(format!("[{}] {}", prompt.role(), prompt.text()))))
    }

    /// Sleep this long inside every call before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn issued_prompts(&self) -> Vec<(String, String)> {
        self.issued.lock().clone()
    }

    /// Prompt texts issued by one role, in issue order.
    pub fn issued_to(&self, role: &str) -> Vec<String> {
        self.issued
            .lock()
            .iter()
            .filter(|(r, _)| r == role)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl InvocationClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        prompt: &Prompt,
        _config: &InvocationConfig,
    ) -> Result<Response, BackendFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.issued
            .lock()
            .push((prompt.role().to_string(), prompt.text().to_string()));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        (self.script)(prompt, call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::AgentSpec;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scripted_client_records_calls() {
        let client = ScriptedClient::echo();
        let agent = Arc::new(AgentSpec::new("worker", "m", "", "Work."));
        let config = InvocationConfig::default();

        let response = client
            .invoke(&Prompt::new(agent.clone(), "task one"), &config)
            .await
            .unwrap();
        client
            .invoke(&Prompt::new(agent, "task two"), &config)
            .await
            .unwrap();

        assert!(matches!(response, Response::Text(ref t) if t == "[worker] task one"));
        assert_eq!(client.calls(), 2);
        assert_eq!(client.issued_to("worker"), vec!["task one", "task two"]);
        assert!(client.issued_to("judge").is_empty());
    }
}
