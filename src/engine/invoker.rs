use futures::StreamExt;
use std::sync::Arc;
use tokio::time::Instant;

use crate::error::{BackendFailure, InvocationError};
use crate::lifecycle::{InvocationEvent, InvocationStateMachine};
use crate::normalize::ResponseNormalizer;
use crate::providers::InvocationClient;
use crate::storage::ResponseCache;
use crate::types::{InvocationConfig, InvocationState, Prompt, Response};

/// Result of one resilient invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Backend attempts made; zero when the cache answered.
    pub attempts: u32,
    pub cached: bool,
    pub trace: Vec<InvocationState>,
}

/// Cache, retry/backoff and timeout around an [`InvocationClient`].
///
/// Distinct keys never wait on each other. Concurrent callers with the same uncached
/// key are not coalesced: each goes to the backend and the last insert wins.
pub struct ResilientInvoker {
    client: Arc<dyn InvocationClient>,
    cache: Arc<dyn ResponseCache>,
    normalizer: ResponseNormalizer,
    config: InvocationConfig,
}

impl ResilientInvoker {
    pub fn new(
        client: Arc<dyn InvocationClient>,
        cache: Arc<dyn ResponseCache>,
        config: InvocationConfig,
    ) -> Self {
        Self {
            client,
            cache,
            normalizer: ResponseNormalizer::default(),
            config,
        }
    }

    pub fn with_normalizer(mut self, normalizer: ResponseNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &InvocationConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.cache
    }

    /// Invoke with the prompt text as cache key and the default config.
    pub async fn invoke(&self, prompt: &Prompt) -> Result<String, InvocationError> {
        self.invoke_with(prompt.text(), prompt, &self.config)
            .await
            .map(|completion| completion.text)
    }

    /// Invoke under an explicit cache key with the default config.
    pub async fn invoke_keyed(
        &self,
        key: &str,
        prompt: &Prompt,
    ) -> Result<Completion, InvocationError> {
        self.invoke_with(key, prompt, &self.config).await
    }

    /// Invoke under an explicit key and config. An empty key falls back to the prompt text.
    pub async fn invoke_with(
        &self,
        key: &str,
        prompt: &Prompt,
        config: &InvocationConfig,
    ) -> Result<Completion, InvocationError> {
        if prompt.text().trim().is_empty() {
            return Err(InvocationError::Validation(format!(
                "empty prompt for agent '{}'",
                prompt.role()
            )));
        }
        config.validate()?;

        let key = if key.is_empty() { prompt.text() } else { key };
        let mut machine = InvocationStateMachine::new();

        if let Some(text) = self.cache.get(key) {
            advance(&mut machine, InvocationEvent::CacheHit);
            advance(&mut machine, InvocationEvent::Succeeded);
            log::debug!("Cache hit for {}", prompt.role());
            return Ok(Completion {
                text,
                attempts: 0,
                cached: true,
                trace: machine.into_trace(),
            });
        }
        advance(&mut machine, InvocationEvent::CacheMiss);

        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let failure = match self.attempt(prompt, config).await {
                Ok(text) => {
                    advance(&mut machine, InvocationEvent::Succeeded);
                    self.cache.insert(key.to_string(), text.clone());
                    log::debug!(
                        "{} answered after {} attempt(s) via {}",
                        prompt.role(),
                        attempt,
                        self.client.name()
                    );
                    return Ok(Completion {
                        text,
                        attempts: attempt,
                        cached: false,
                        trace: machine.into_trace(),
                    });
                }
                Err(failure) => failure,
            };

            if !config.is_retryable(&failure) {
                advance(&mut machine, InvocationEvent::Failed);
                log::error!(
                    "{} failed on attempt {} with non-retryable error: {}",
                    prompt.role(),
                    attempt,
                    failure
                );
                return Err(InvocationError::Fatal {
                    attempt,
                    cause: failure,
                });
            }

            let last = InvocationError::Transient {
                attempt,
                cause: failure,
            };

            if attempt >= config.max_attempts {
                advance(&mut machine, InvocationEvent::Failed);
                log::error!(
                    "{} exhausted {} attempts: {}",
                    prompt.role(),
                    attempt,
                    last
                );
                return Err(InvocationError::FailedAfterRetries {
                    attempts: attempt,
                    last: Box::new(last),
                });
            }

            let delay = config.backoff_delay(attempt);
            if let Some(budget) = config.total_budget() {
                if started.elapsed().saturating_add(delay) > budget {
                    advance(&mut machine, InvocationEvent::Failed);
                    log::error!(
                        "{} stopped after {} attempts: next backoff exceeds {:?}",
                        prompt.role(),
                        attempt,
                        budget
                    );
                    return Err(InvocationError::RetryBudgetExhausted {
                        attempts: attempt,
                        budget,
                        last: Box::new(last),
                    });
                }
            }

            advance(&mut machine, InvocationEvent::RetryScheduled);
            log::warn!(
                "{} attempt {}/{} failed ({}); retrying in {:?}",
                prompt.role(),
                attempt,
                config.max_attempts,
                last,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One backend call plus draining, under the per-attempt timeout.
    async fn attempt(
        &self,
        prompt: &Prompt,
        config: &InvocationConfig,
    ) -> Result<String, BackendFailure> {
        let call = async {
            let response = self.client.invoke(prompt, config).await?;

            // Stream events are incremental deltas; list events are separate messages.
            let separator = match response {
                Response::EventStream(_) => "",
                Response::Text(_) | Response::EventList(_) => "\n",
            };

            let mut chunks = self.client.drain(response, self.normalizer);
            let mut parts = Vec::new();
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                if !chunk.is_empty() {
                    parts.push(chunk);
                }
            }
            Ok::<String, BackendFailure>(parts.join(separator))
        };

        match config.attempt_timeout() {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(BackendFailure::Timeout(format!(
                    "no response within {:?}",
                    limit
                )))
            }),
            None => call.await,
        }
    }
}

fn advance(machine: &mut InvocationStateMachine, event: InvocationEvent) {
    if let Err(e) = machine.apply(event) {
        log::error!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::AgentSpec;
    use crate::providers::ScriptedClient;
    use crate::storage::InMemoryCache;
    use crate::types::Event;
    use futures::stream;

    fn prompt(text: &str) -> Prompt {
        Prompt::new(Arc::new(AgentSpec::new("worker", "m", "", "Work.")), text)
    }

    fn invoker(client: Arc<ScriptedClient>) -> ResilientInvoker {
        ResilientInvoker::new(
            client,
            Arc::new(InMemoryCache::new()),
            InvocationConfig::default().with_initial_delay(0.0),
        )
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected_before_any_call() {
        let client = Arc::new(ScriptedClient::constant("x"));
        let invoker = invoker(client.clone());

        let err = invoker.invoke(&prompt("   ")).await.unwrap_err();
        assert!(matches!(err, InvocationError::Validation(_)));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_any_call() {
        let client = Arc::new(ScriptedClient::constant("x"));
        let invoker = invoker(client.clone());
        let config = InvocationConfig::default().with_max_attempts(0);

        let err = invoker
            .invoke_with("k", &prompt("hello"), &config)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_event_list_chunks_are_joined_by_lines() {
        let client = Arc::new(ScriptedClient::new(|_, _| {
            Ok(Response::EventList(vec![
                Event::text("first"),
                Event::text(""),
                Event::text("second"),
            ]))
        }));

        let text = invoker(client).invoke(&prompt("hello")).await.unwrap();
        assert_eq!(text, "first\nsecond");
    }

    #[tokio::test]
    async fn test_stream_chunks_are_concatenated() {
        let client = Arc::new(ScriptedClient::new(|_, _| {
            let events: Vec<Result<Event, BackendFailure>> =
                vec![Ok(Event::text("Hel")), Ok(Event::text("lo"))];
            Ok(Response::EventStream(Box::pin(stream::iter(events))))
        }));

        let text = invoker(client).invoke(&prompt("hello")).await.unwrap();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_trace_for_success_and_cache_hit() {
        let client = Arc::new(ScriptedClient::constant("ok"));
        let invoker = invoker(client);

        let first = invoker.invoke_keyed("k", &prompt("hello")).await.unwrap();
        assert_eq!(
            first.trace,
            vec![
                InvocationState::Pending,
                InvocationState::InFlight,
                InvocationState::Done
            ]
        );

        let second = invoker.invoke_keyed("k", &prompt("hello")).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.attempts, 0);
        assert_eq!(
            second.trace,
            vec![
                InvocationState::Pending,
                InvocationState::CacheHit,
                InvocationState::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_classified() {
        let client = Arc::new(ScriptedClient::new(|_, _| {
            let events = vec![
                Ok(Event::text("partial")),
                Err(BackendFailure::status(503, "dropped")),
            ];
            Ok(Response::EventStream(Box::pin(stream::iter(events))))
        }));
        let invoker = ResilientInvoker::new(
            client.clone(),
            Arc::new(InMemoryCache::new()),
            InvocationConfig::default()
                .with_initial_delay(0.0)
                .with_max_attempts(2),
        );

        let err = invoker.invoke(&prompt("hello")).await.unwrap_err();
        assert_eq!(err.attempts(), Some(2));
        assert_eq!(client.calls(), 2);
        assert!(invoker.cache().is_empty());
    }
}
