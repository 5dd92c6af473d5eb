//! Configuration loader and validator for the reel scheduler.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::lifecycle::FailedRetry;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Upper bound for `app.stale_after_secs` (30 days).
const MAX_STALE_AFTER_SECS: u64 = 30 * 24 * 3600;

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub publisher: Publisher,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_secs: u64,
    /// Let scheduled cycles pick up `FAILED` posts again.
    #[serde(default)]
    pub retry_failed: bool,
    /// Age after which a `PROCESSING` claim is considered abandoned at start-up.
    pub stale_after_secs: u64,
}

/// Publishing platform endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Publisher {
    pub api_base: String,
    pub api_version: String,
    pub request_timeout_secs: u64,
    pub status_poll_interval_ms: u64,
    pub status_poll_attempts: u32,
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/reels.db", self.resolved_data_dir()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Bounded by [`validate`], so the conversion cannot overflow.
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs.min(MAX_STALE_AFTER_SECS) as i64)
    }

    pub fn failed_retry(&self) -> FailedRetry {
        FailedRetry::from_flag(self.retry_failed)
    }
}

impl Publisher {
    /// Longest a single publish attempt can run: every request (container,
    /// each status poll, publish) hitting its timeout, plus every poll wait.
    pub fn max_attempt_secs(&self) -> u64 {
        let attempts = u64::from(self.status_poll_attempts);
        let requests = self
            .request_timeout_secs
            .saturating_mul(attempts.saturating_add(2));
        let waits = self
            .status_poll_interval_ms
            .saturating_mul(attempts)
            .div_ceil(1000);
        requests.saturating_add(waits)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.stale_after_secs == 0 {
        return Err(ConfigError::Invalid("app.stale_after_secs must be > 0"));
    }
    if cfg.app.stale_after_secs > MAX_STALE_AFTER_SECS {
        return Err(ConfigError::Invalid(
            "app.stale_after_secs must be at most 30 days",
        ));
    }

    match Url::parse(&cfg.publisher.api_base) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => {
            return Err(ConfigError::Invalid(
                "publisher.api_base must be an absolute http(s) URL",
            ))
        }
    }
    if cfg.publisher.api_version.trim().is_empty() {
        return Err(ConfigError::Invalid("publisher.api_version must be non-empty"));
    }
    if cfg.publisher.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "publisher.request_timeout_secs must be > 0",
        ));
    }
    if cfg.publisher.status_poll_attempts == 0 {
        return Err(ConfigError::Invalid(
            "publisher.status_poll_attempts must be > 0",
        ));
    }
    // A claim younger than the longest attempt may still be live in another process.
    if cfg.app.stale_after_secs < cfg.publisher.max_attempt_secs() {
        return Err(ConfigError::Invalid(
            "app.stale_after_secs must cover the longest publish attempt",
        ));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_secs: 60
  retry_failed: false
  stale_after_secs: 900

publisher:
  api_base: "https://graph.facebook.com/"
  api_version: "v21.0"
  request_timeout_secs: 30
  status_poll_interval_ms: 5000
  status_poll_attempts: 24
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = parse(example()).unwrap();
        assert_eq!(cfg.app.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.app.failed_retry(), FailedRetry::ManualOnly);
    }

    #[test]
    fn retry_failed_defaults_to_false() {
        let doc = example().replace("  retry_failed: false\n", "");
        let cfg = parse(&doc).unwrap();
        assert!(!cfg.app.retry_failed);
    }

    #[test]
    fn invalid_intervals() {
        let mut cfg = example_cfg();
        cfg.app.poll_interval_secs = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("poll_interval_secs")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.app.stale_after_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.publisher.status_poll_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn stale_window_is_bounded() {
        let mut cfg = example_cfg();
        cfg.app.stale_after_secs = u64::MAX;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("stale_after_secs")),
            _ => panic!("wrong error"),
        }

        cfg.app.stale_after_secs = (i64::MAX / 1000) as u64 + 1;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        cfg.app.stale_after_secs = MAX_STALE_AFTER_SECS;
        assert!(validate(&cfg).is_ok());
        assert_eq!(cfg.app.stale_after().num_seconds(), MAX_STALE_AFTER_SECS as i64);
    }

    #[test]
    fn stale_window_covers_the_longest_attempt() {
        let cfg = example_cfg();
        // 30s x (24 polls + create + publish) + 5s x 24 waits
        assert_eq!(cfg.publisher.max_attempt_secs(), 900);
        assert!(cfg.app.stale_after_secs >= cfg.publisher.max_attempt_secs());

        let mut cfg = example_cfg();
        cfg.publisher.request_timeout_secs = 60;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("longest publish attempt")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.publisher.status_poll_interval_ms = u64::MAX;
        assert!(cfg.publisher.max_attempt_secs() > MAX_STALE_AFTER_SECS);
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_publisher_endpoint() {
        let mut cfg = example_cfg();
        cfg.publisher.api_base = "graph.facebook.com".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("api_base")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.publisher.api_version = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.publisher.api_version, "v21.0");
    }
}
