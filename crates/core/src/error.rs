// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// A document rejected locally, before any request is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{filename} is empty")]
    Empty { filename: String },

    #[error("{filename} is too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        filename: String,
        size: u64,
        max: u64,
    },

    #[error("{filename} is not a supported document ({content_type})")]
    UnsupportedType {
        filename: String,
        content_type: String,
    },
}

/// Errors talking to the job service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Connection refused, reset, timed out, stream dropped.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Job not found: {job_id}")]
    NotFound { job_id: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid service URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl ServiceError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Message suitable for the job's `error` field.
    pub fn user_message(&self) -> String {
        match self {
            Self::Server { message, .. } => message.clone(),
            Self::NotFound { .. } => "Job no longer exists on the server".to_string(),
            Self::Transport(_) => "Upload failed: could not reach the server".to_string(),
            Self::Decode(_) => "Upload failed: unexpected server response".to_string(),
            Self::InvalidUrl { .. } => "Upload failed: job service is misconfigured".to_string(),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Errors from the durable job store. Never escape the tracker.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on job store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed job store {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Job store {path} has version {found}, expected {expected}")]
    Version {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("Failed to serialize jobs: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("No data directory available for the job store; set DOCJOBS_STORE_PATH")]
    NoDataDir,
}

/// Errors reported to callers of [`crate::JobTracker`].
///
/// Transport and persistence failures are absorbed into job state; only
/// conditions the caller must act on show up here.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No password prompt is pending")]
    NoPendingPrompt,

    #[error("A password for {filename} is already being submitted")]
    PromptBusy { filename: String },

    #[error("No tracked job with id {id}")]
    UnknownJob { id: String },

    #[error("Job tracker has been shut down")]
    ShutDown,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_prefers_server_text() {
        let err = ServiceError::Server {
            status: 422,
            message: "Unsupported bank format".into(),
        };
        assert_eq!(err.user_message(), "Unsupported bank format");
        assert!(!err.is_not_found());
        assert!(ServiceError::NotFound { job_id: "J1".into() }.is_not_found());
    }

    #[test]
    fn test_validation_display() {
        let err = ValidationError::TooLarge {
            filename: "big.pdf".into(),
            size: 11,
            max: 10,
        };
        assert_eq!(err.to_string(), "big.pdf is too large (11 bytes, max 10 bytes)");
    }
}
