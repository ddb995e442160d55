use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::engine::HierarchyLimits;
use crate::error::ConfigError;
use crate::normalize::{ResponseNormalizer, DEFAULT_DUMP_LIMIT};
use crate::providers::{
    AnthropicProvider, GeminiProvider, InvocationClient, OllamaProvider, OpenAIProvider,
    ScriptedClient,
};
use crate::storage::{CapacityEviction, InMemoryCache, ResponseCache, TtlEviction};
use crate::types::InvocationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Gemini,
    OpenAI,
    Anthropic,
    Ollama,
    /// Offline client that answers with the prompt it was given.
    Echo,
}

impl Backend {
    pub fn as_str(&self) -> &str {
        match self {
            Backend::Gemini => "gemini",
            Backend::OpenAI => "openai",
            Backend::Anthropic => "anthropic",
            Backend::Ollama => "ollama",
            Backend::Echo => "echo",
        }
    }

    pub fn default_model(&self) -> &str {
        match self {
            Backend::Gemini => crate::definitions::builtin::DEFAULT_MODEL,
            Backend::OpenAI => "gpt-4o-mini",
            Backend::Anthropic => "claude-sonnet-4-20250514",
            Backend::Ollama => "llama3.2",
            Backend::Echo => "echo",
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Backend::Gemini),
            "openai" => Ok(Backend::OpenAI),
            "anthropic" => Ok(Backend::Anthropic),
            "ollama" => Ok(Backend::Ollama),
            "echo" => Ok(Backend::Echo),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are ignored. Unset keeps them for the process lifetime.
    pub ttl_secs: Option<u64>,
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    /// Overrides every agent's model when set.
    pub model: Option<String>,
    pub google_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub ollama_url: Option<String>,
    /// YAML file whose agent specs replace the built-ins by name.
    pub roster: Option<String>,
    pub invocation: InvocationConfig,
    /// Opt-in cap, in characters, on normalized model text.
    pub text_limit: Option<usize>,
    pub cache: CacheConfig,
    pub hierarchy: HierarchyLimits,
}

impl Config {
    /// Defaults, then the TOML file if given, then environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str::<Config>(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from a variable lookup; `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ENSEMBLE_BACKEND") {
            self.backend = value.parse()?;
        }
        if let Some(value) = lookup("ENSEMBLE_MODEL") {
            self.model = Some(value);
        }
        if let Some(value) = lookup("ENSEMBLE_MAX_ATTEMPTS") {
            self.invocation.max_attempts = parse_var("ENSEMBLE_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("ENSEMBLE_TIMEOUT_SECS") {
            self.invocation.timeout = Some(parse_var("ENSEMBLE_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("ENSEMBLE_INITIAL_DELAY_SECS") {
            self.invocation.initial_delay = parse_var("ENSEMBLE_INITIAL_DELAY_SECS", &value)?;
        }
        if let Some(value) = lookup("ENSEMBLE_BACKOFF_BASE") {
            self.invocation.backoff_base = parse_var("ENSEMBLE_BACKOFF_BASE", &value)?;
        }
        if let Some(value) = lookup("ENSEMBLE_TEXT_LIMIT") {
            self.text_limit = Some(parse_var("ENSEMBLE_TEXT_LIMIT", &value)?);
        }
        if let Some(value) = lookup("OLLAMA_URL") {
            self.ollama_url = Some(value);
        }
        if let Some(value) = lookup("GOOGLE_API_KEY") {
            self.google_api_key = Some(value);
        }
        if let Some(value) = lookup("OPENAI_API_KEY") {
            self.openai_api_key = Some(value);
        }
        if let Some(value) = lookup("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.invocation
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                key: "invocation".to_string(),
                value: e.to_string(),
            })?;
        if self.text_limit == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "text_limit".to_string(),
                value: "0".to_string(),
            });
        }
        self.cache_ttl()?;
        if self.cache.max_entries == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "cache.max_entries".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Model given to agents: the override, else the backend's default.
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.backend.default_model())
    }

    pub fn build_client(&self) -> Result<Arc<dyn InvocationClient>, ConfigError> {
        let client: Arc<dyn InvocationClient> = match self.backend {
            Backend::Gemini => {
                let key = require(&self.google_api_key, "GOOGLE_API_KEY")?;
                let mut provider = GeminiProvider::new(key);
                if let Some(model) = &self.model {
                    provider = provider.with_model(model.clone());
                }
                Arc::new(provider)
            }
            Backend::OpenAI => {
                let key = require(&self.openai_api_key, "OPENAI_API_KEY")?;
                let mut provider = OpenAIProvider::new(key);
                if let Some(model) = &self.model {
                    provider = provider.with_model(model.clone());
                }
                Arc::new(provider)
            }
            Backend::Anthropic => {
                let key = require(&self.anthropic_api_key, "ANTHROPIC_API_KEY")?;
                let mut provider = AnthropicProvider::new(key);
                if let Some(model) = &self.model {
                    provider = provider.with_model(model.clone());
                }
                Arc::new(provider)
            }
            Backend::Ollama => Arc::new(OllamaProvider::new(
                self.ollama_url.clone(),
                self.model.clone(),
            )),
            Backend::Echo => Arc::new(ScriptedClient::echo()),
        };
        log::info!("Using {} backend with model {}", self.backend.as_str(), self.model());
        Ok(client)
    }

    pub fn normalizer(&self) -> ResponseNormalizer {
        ResponseNormalizer::new(DEFAULT_DUMP_LIMIT, self.text_limit)
    }

    fn cache_ttl(&self) -> Result<Option<chrono::Duration>, ConfigError> {
        let Some(secs) = self.cache.ttl_secs else {
            return Ok(None);
        };
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "cache.ttl_secs".to_string(),
                value: secs.to_string(),
            })
    }

    /// An out-of-range TTL keeps entries forever; `validate` rejects it first.
    pub fn build_cache(&self) -> Arc<dyn ResponseCache> {
        let ttl = self
            .cache_ttl()
            .ok()
            .flatten()
            .map(|ttl| TtlEviction { ttl });
        let capacity = self
            .cache
            .max_entries
            .map(|max_entries| CapacityEviction { max_entries });

        let cache = match (ttl, capacity) {
            (None, None) => InMemoryCache::new(),
            (Some(ttl), None) => InMemoryCache::with_policy(Arc::new(ttl)),
            (None, Some(capacity)) => InMemoryCache::with_policy(Arc::new(capacity)),
            (Some(ttl), Some(capacity)) => InMemoryCache::with_policy(Arc::new((ttl, capacity))),
        };
        Arc::new(cache)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn require(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .as_ref()
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or(ConfigError::MissingCredential(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend, Backend::Gemini);
        assert_eq!(config.model(), "gemini-2.5-pro");
        assert_eq!(config.invocation.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
backend = "ollama"
ollama_url = "http://gpu-box:11434"

[invocation]
max_attempts = 2
initial_delay = 0.5

[cache]
max_entries = 100

[hierarchy]
max_managers = 4
"#
        )
        .unwrap();

        let mut config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.backend, Backend::Ollama);
        assert_eq!(config.invocation.max_attempts, 2);
        assert_eq!(config.invocation.backoff_base, 3.0);
        assert_eq!(config.cache.max_entries, Some(100));
        assert_eq!(config.hierarchy.max_managers, Some(4));
        assert_eq!(config.model(), "llama3.2");

        config
            .apply_overrides(lookup(&[
                ("ENSEMBLE_MAX_ATTEMPTS", "7"),
                ("ENSEMBLE_MODEL", "qwen2.5"),
            ]))
            .unwrap();
        assert_eq!(config.invocation.max_attempts, 7);
        assert_eq!(config.model(), "qwen2.5");
        assert_eq!(config.ollama_url.as_deref(), Some("http://gpu-box:11434"));
    }

    #[test]
    fn test_bad_overrides_are_reported() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("ENSEMBLE_MAX_ATTEMPTS", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = config
            .apply_overrides(lookup(&[("ENSEMBLE_BACKEND", "mainframe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend(_)));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = [").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_credential() {
        let config = Config {
            backend: Backend::OpenAI,
            ..Config::default()
        };
        assert!(matches!(
            config.build_client(),
            Err(ConfigError::MissingCredential("OPENAI_API_KEY"))
        ));
    }

    #[test]
    fn test_echo_backend_needs_no_key() {
        let config = Config {
            backend: Backend::Echo,
            ..Config::default()
        };
        let client = config.build_client().unwrap();
        assert_eq!(client.name(), "scripted");
    }

    #[test]
    fn test_cache_capacity_is_applied() {
        let config = Config {
            cache: CacheConfig {
                ttl_secs: Some(3600),
                max_entries: Some(1),
            },
            ..Config::default()
        };
        let cache = config.build_cache();
        cache.insert("a".to_string(), "1".to_string());
        cache.insert("b".to_string(), "2".to_string());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }

    #[test]
    fn test_out_of_range_ttl_is_invalid() {
        let config = Config {
            cache: CacheConfig {
                ttl_secs: Some(i64::MAX as u64),
                max_entries: None,
            },
            ..Config::default()
        };
        match config.validate().unwrap_err() {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "cache.ttl_secs"),
            other => panic!("unexpected error: {:?}", other),
        }

        // Building anyway must not panic.
        let cache = config.build_cache();
        cache.insert("a".to_string(), "1".to_string());
        assert_eq!(cache.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn test_oversized_timeout_override_is_invalid() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[("ENSEMBLE_TIMEOUT_SECS", "1e300")]))
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_text_limit_is_opt_in() {
        assert_eq!(Config::default().normalizer(), ResponseNormalizer::default());

        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[("ENSEMBLE_TEXT_LIMIT", "200")]))
            .unwrap();
        assert_eq!(config.normalizer().text_limit, Some(200));
        assert_eq!(config.normalizer().dump_limit, DEFAULT_DUMP_LIMIT);

        config.text_limit = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        let config = Config {
            cache: CacheConfig {
                ttl_secs: None,
                max_entries: Some(0),
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
