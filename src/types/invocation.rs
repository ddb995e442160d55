use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{BackendFailure, InvocationError};

/// Retry, backoff and timeout settings for one invocation.
///
/// Durations are seconds as floats, matching the configuration file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    pub max_attempts: u32,
    pub backoff_base: f64,
    pub initial_delay: f64,
    pub retryable_status_codes: BTreeSet<u16>,
    /// Per-attempt timeout.
    pub timeout: Option<f64>,
    /// Ceiling on the wall time spent across all attempts and backoff sleeps.
    pub total_timeout: Option<f64>,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: 3.0,
            initial_delay: 1.0,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            timeout: Some(30.0),
            total_timeout: None,
        }
    }
}

impl InvocationConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, seconds: f64) -> Self {
        self.initial_delay = seconds;
        self
    }

    pub fn with_backoff_base(mut self, base: f64) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_timeout(mut self, seconds: Option<f64>) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_total_timeout(mut self, seconds: Option<f64>) -> Self {
        self.total_timeout = seconds;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), InvocationError> {
        if self.max_attempts == 0 {
            return Err(InvocationError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_base.is_finite() || self.backoff_base <= 1.0 {
            return Err(InvocationError::Validation(format!(
                "backoff_base must be greater than 1, got {}",
                self.backoff_base
            )));
        }
        if !self.initial_delay.is_finite() || self.initial_delay < 0.0 {
            return Err(InvocationError::Validation(format!(
                "initial_delay must be a non-negative number of seconds, got {}",
                self.initial_delay
            )));
        }
        for (name, value) in [("timeout", self.timeout), ("total_timeout", self.total_timeout)] {
            if let Some(seconds) = value {
                if !seconds.is_finite() || seconds <= 0.0 {
                    return Err(InvocationError::Validation(format!(
                        "{} must be a positive number of seconds, got {}",
                        name, seconds
                    )));
                }
                if Duration::try_from_secs_f64(seconds).is_err() {
                    return Err(InvocationError::Validation(format!(
                        "{} of {} seconds is out of range",
                        name, seconds
                    )));
                }
            }
        }
        Ok(())
    }

    /// Delay before the attempt that follows failed attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let seconds = self.initial_delay * self.backoff_base.powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// Out-of-range values saturate; `validate` rejects them up front.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.timeout.map(saturating_secs)
    }

    pub fn total_budget(&self) -> Option<Duration> {
        self.total_timeout.map(saturating_secs)
    }

    /// Whether a backend failure should be retried under this config.
    pub fn is_retryable(&self, failure: &BackendFailure) -> bool {
        match failure {
            BackendFailure::Timeout(_) => true,
            BackendFailure::Status { code, .. } => self.retryable_status_codes.contains(code),
            BackendFailure::Transport(_) | BackendFailure::Decode(_) => false,
        }
    }
}

fn saturating_secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(if seconds > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_retry_options() {
        let config = InvocationConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_base, 3.0);
        assert_eq!(config.initial_delay, 1.0);
        assert!(config.retryable_status_codes.contains(&429));
        assert!(config.retryable_status_codes.contains(&504));
        assert!(!config.retryable_status_codes.contains(&400));
        assert_eq!(config.timeout, Some(30.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_delay_grows_geometrically() {
        let config = InvocationConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(3));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(9));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(InvocationConfig::default().with_max_attempts(0).validate().is_err());
        assert!(InvocationConfig::default().with_backoff_base(1.0).validate().is_err());
        assert!(InvocationConfig::default().with_initial_delay(-1.0).validate().is_err());
        assert!(InvocationConfig::default().with_timeout(Some(0.0)).validate().is_err());
        assert!(InvocationConfig::default()
            .with_total_timeout(Some(f64::NAN))
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_timeouts_beyond_duration_range() {
        let err = InvocationConfig::default()
            .with_timeout(Some(1e20))
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = InvocationConfig::default()
            .with_total_timeout(Some(1e300))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("total_timeout"));
    }

    #[test]
    fn test_oversized_timeouts_saturate_instead_of_panicking() {
        let config = InvocationConfig::default()
            .with_timeout(Some(1e20))
            .with_total_timeout(Some(1e300));
        assert_eq!(config.attempt_timeout(), Some(Duration::MAX));
        assert_eq!(config.total_budget(), Some(Duration::MAX));
    }

    #[test]
    fn test_retry_classification() {
        let config = InvocationConfig::default();
        assert!(config.is_retryable(&BackendFailure::status(503, "busy")));
        assert!(config.is_retryable(&BackendFailure::Timeout("slow".into())));
        assert!(!config.is_retryable(&BackendFailure::status(401, "denied")));
        assert!(!config.is_retryable(&BackendFailure::Transport("reset".into())));
    }

    #[test]
    fn test_config_from_toml_fills_defaults() {
        let config: InvocationConfig = toml::from_str("max_attempts = 2\ntimeout = 5.0").unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.timeout, Some(5.0));
        assert_eq!(config.backoff_base, 3.0);
    }
}
