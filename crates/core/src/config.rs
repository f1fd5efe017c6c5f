// crates/core/src/config.rs
//! Tracker configuration: defaults, TOML file, environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// File name of the persisted registry. The version suffix keeps records
/// from an incompatible schema from being picked up.
pub const STORE_FILE_NAME: &str = "jobs.v2.json";

/// Backoff policy for the polling fallback.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub initial_delay_ms: u64,
    pub growth_factor: f64,
    pub max_delay_ms: u64,
    /// Circuit breaker: polling stops after this many requests.
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            growth_factor: 1.5,
            max_delay_ms: 15_000,
            max_attempts: 120,
        }
    }
}

impl PollConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Configuration for a [`crate::JobTracker`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Base URL of the job service (`POST {api_url}/jobs`, ...).
    pub api_url: String,
    /// Bearer credential sent on every request, including the push stream.
    pub api_token: Option<String>,
    /// Location of the persisted registry. `None` = platform data dir.
    pub store_path: Option<PathBuf>,
    pub max_document_bytes: u64,
    pub accepted_content_types: Vec<String>,
    pub accepted_extensions: Vec<String>,
    /// Terminal jobs older than this are pruned from the store.
    pub retention_secs: u64,
    /// Applied to submit and status requests, not to the push stream.
    pub request_timeout_secs: u64,
    pub poll: PollConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            store_path: None,
            max_document_bytes: 10 * 1024 * 1024,
            accepted_content_types: vec!["application/pdf".to_string()],
            accepted_extensions: vec!["pdf".to_string()],
            retention_secs: 60 * 60,
            request_timeout_secs: 30,
            poll: PollConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Read a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = config.with_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `DOCJOBS_API_URL`, `DOCJOBS_API_TOKEN` and `DOCJOBS_STORE_PATH`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty("DOCJOBS_API_URL") {
            self.api_url = url;
        }
        if let Some(token) = non_empty("DOCJOBS_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(path) = non_empty("DOCJOBS_STORE_PATH") {
            self.store_path = Some(PathBuf::from(path));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_url must not be empty".into()));
        }
        if let Err(e) = reqwest::Url::parse(&self.api_url) {
            return Err(ConfigError::Invalid(format!("api_url {:?}: {e}", self.api_url)));
        }
        if self.max_document_bytes == 0 {
            return Err(ConfigError::Invalid("max_document_bytes must be positive".into()));
        }
        if !self.poll.growth_factor.is_finite() || self.poll.growth_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "poll.growth_factor must be >= 1.0, got {}",
                self.poll.growth_factor
            )));
        }
        if self.poll.max_attempts == 0 {
            return Err(ConfigError::Invalid("poll.max_attempts must be positive".into()));
        }
        if self.poll.initial_delay_ms > self.poll.max_delay_ms {
            return Err(ConfigError::Invalid(
                "poll.initial_delay_ms must not exceed poll.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Where the registry lives: explicit path, else `<data dir>/docjobs/`.
    pub fn resolved_store_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("docjobs").join(STORE_FILE_NAME))
                .ok_or(ConfigError::NoDataDir),
        }
    }
}
