//! Tracker configuration.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Files ending in `.json` are read as JSON, anything else as YAML.

use crate::fetch::RateLimiter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),

    #[error("error building HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Number of concurrent workers per repository.
    pub workers: usize,

    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,

    /// Upper bound for a whole job, download to registration.
    pub job_timeout_secs: u64,

    pub rate_limit: RateLimitConfig,

    /// Hosts (and their subdomains) whose requests go through the rate limiter.
    pub rate_limited_hosts: Vec<String>,

    /// Icons starting with this prefix are decoded inline, not fetched.
    pub inline_icon_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 0 disables rate limiting.
    pub requests_per_hour: u32,
    pub burst: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            http_timeout_secs: 30,
            connect_timeout_secs: 10,
            job_timeout_secs: 300,
            rate_limit: RateLimitConfig::default(),
            rate_limited_hosts: vec![
                "github.com".to_string(),
                "raw.githubusercontent.com".to_string(),
            ],
            inline_icon_prefix: "data:".to_string(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_hour: 5000,
            burst: 1,
        }
    }
}

impl TrackerConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&raw),
            _ => Self::from_yaml(&raw),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be greater than 0"));
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::Invalid("job_timeout_secs must be greater than 0"));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// reqwest client honoring the configured timeouts.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build()?;
        Ok(client)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        match self.rate_limit.requests_per_hour {
            0 => RateLimiter::unlimited(),
            rph => RateLimiter::new(rph, self.rate_limit.burst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = TrackerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.workers, 10);
        assert_eq!(config.job_timeout(), Duration::from_secs(300));
        assert_eq!(config.rate_limit.requests_per_hour, 5000);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let config = TrackerConfig::from_yaml(
            r#"
workers: 4
rate_limit:
  requests_per_hour: 0
rate_limited_hosts: [api.example.com]
"#,
        )
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.rate_limit.requests_per_hour, 0);
        assert_eq!(config.rate_limit.burst, 1);
        assert_eq!(config.rate_limited_hosts, vec!["api.example.com"]);
        assert_eq!(config.inline_icon_prefix, "data:");
    }

    #[test]
    fn test_json_config() {
        let config = TrackerConfig::from_json(r#"{"workers": 2, "http_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert_matches!(
            TrackerConfig::from_yaml("workers: 0"),
            Err(ConfigError::Invalid(_))
        );
    }

    #[test]
    fn test_malformed_yaml() {
        assert_matches!(
            TrackerConfig::from_yaml("workers: [1"),
            Err(ConfigError::Yaml(_))
        );
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            TrackerConfig::from_file("/nonexistent/tracker.yaml"),
            Err(ConfigError::Io(_))
        );
    }

    #[tokio::test]
    async fn test_disabled_rate_limit_builds_unlimited_limiter() {
        let config = TrackerConfig {
            rate_limit: RateLimitConfig {
                requests_per_hour: 0,
                burst: 1,
            },
            ..Default::default()
        };
        let limiter = config.rate_limiter();
        let cancel = tokio_util::sync::CancellationToken::new();
        for _ in 0..10 {
            limiter.wait(&cancel).await.unwrap();
        }
        assert!(config.http_client().is_ok());
    }
}
