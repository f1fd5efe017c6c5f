// crates/observability/src/lib.rs
//! Tracing setup shared by docjobs binaries.
//!
//! One call to [`init_tracing`] installs:
//! - an `EnvFilter` (explicit directive, else `RUST_LOG`, else [`DEFAULT_FILTER`])
//! - a stderr fmt layer, human-readable or JSON
//! - optionally a daily-rolling JSON file under `log_dir`

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const DEFAULT_FILTER: &str = "warn,docjobs_core=info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive; overrides `RUST_LOG` when set.
    pub filter: Option<String>,
    pub format: LogFormat,
    /// Also write JSON logs here, one file per day.
    pub log_dir: Option<PathBuf>,
    /// File name prefix inside `log_dir`.
    pub file_prefix: Option<String>,
}

impl LogConfig {
    /// `DOCJOBS_LOG`, `DOCJOBS_LOG_FORMAT`, `DOCJOBS_LOG_DIR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            filter: lookup("DOCJOBS_LOG").filter(|s| !s.trim().is_empty()),
            format: lookup("DOCJOBS_LOG_FORMAT")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            log_dir: lookup("DOCJOBS_LOG_DIR").map(PathBuf::from),
            file_prefix: None,
        }
    }

    fn prefix(&self) -> &str {
        self.file_prefix.as_deref().unwrap_or("docjobs.log")
    }
}

/// Resolve the filter directive. Unparseable directives fall back to the
/// default rather than silencing everything.
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    let directive = config
        .filter
        .clone()
        .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("invalid log filter {directive:?} ({e}); using {DEFAULT_FILTER:?}");
        EnvFilter::new(DEFAULT_FILTER)
    })
}

/// Install the global subscriber.
///
/// Hold on to the returned guard for the life of the process when file
/// logging is enabled; dropping it flushes and stops the writer thread.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let stderr = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
            .boxed(),
    };

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, config.prefix());
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(stderr)
        .with(file)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_config_from_lookup() {
        let env = HashMap::from([
            ("DOCJOBS_LOG", "docjobs_core=debug"),
            ("DOCJOBS_LOG_FORMAT", "json"),
            ("DOCJOBS_LOG_DIR", "/tmp/docjobs-logs"),
        ]);
        let config = LogConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.filter.as_deref(), Some("docjobs_core=debug"));
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/docjobs-logs")));
        assert_eq!(config.prefix(), "docjobs.log");
    }

    #[test]
    fn test_blank_filter_is_ignored() {
        let config = LogConfig::from_lookup(|k| (k == "DOCJOBS_LOG").then(|| "  ".to_string()));
        assert_eq!(config.filter, None);
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_explicit_filter_wins() {
        let config = LogConfig {
            filter: Some("docjobs_core=trace".into()),
            ..LogConfig::default()
        };
        assert_eq!(build_filter(&config).to_string(), "docjobs_core=trace");
    }

    #[test]
    fn test_bad_filter_falls_back() {
        let config = LogConfig {
            filter: Some("docjobs_core=notalevel".into()),
            ..LogConfig::default()
        };
        assert_eq!(build_filter(&config).to_string(), EnvFilter::new(DEFAULT_FILTER).to_string());
    }

    #[test]
    fn test_init_with_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            filter: Some("info".into()),
            log_dir: Some(dir.path().join("logs")),
            ..LogConfig::default()
        };
        let guard = init_tracing(&config).unwrap();
        assert!(guard.is_some());
        assert!(dir.path().join("logs").is_dir());
        // Only one global subscriber per process.
        assert!(init_tracing(&LogConfig::default()).is_err());
    }
}
