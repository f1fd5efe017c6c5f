// crates/types/src/wire.rs
//! Payloads exchanged with the job service.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::job::{JobStatus, JobUpdate};

/// SSE event name carrying job updates on the push stream.
pub const JOB_UPDATE_EVENT: &str = "job-update";

/// Error code the service uses for encrypted documents.
pub const PASSWORD_REQUIRED_CODE: &str = "PDF_PASSWORD_REQUIRED";

/// Marker the service places in `details` for encrypted documents.
pub const PASSWORD_REQUIRED_MARKER: &str = "passwordRequired=true";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

/// A status string from the server, normalized on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct RemoteStatus(pub JobStatus);

impl TryFrom<String> for RemoteStatus {
    type Error = UnknownStatus;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        JobStatus::from_remote(&raw)
            .map(RemoteStatus)
            .ok_or(UnknownStatus(raw))
    }
}

fn clamp_progress(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// `GET /jobs/{jobId}` response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress_percent: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl From<JobSnapshot> for JobUpdate {
    fn from(s: JobSnapshot) -> Self {
        JobUpdate::new(
            s.status.0,
            s.progress_percent.map(clamp_progress),
            s.error_message,
        )
    }
}

/// Data of a `job-update` event on the push stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamUpdate {
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<StreamUpdate> for JobUpdate {
    fn from(s: StreamUpdate) -> Self {
        JobUpdate::new(s.status.0, s.progress.map(clamp_progress), s.error)
    }
}

/// Structured error body returned by the job service on non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../ui/src/types/generated/"))]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorBody {
    pub message: Option<String>,
    pub error: Option<String>,
    pub code: Option<String>,
    /// Sent as `null` when the server has nothing to add.
    #[serde(deserialize_with = "null_as_default")]
    pub details: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub password_required: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ErrorBody {
    /// Whether this failure is really a request for the document password.
    pub fn is_password_required(&self) -> bool {
        self.password_required
            || self.code.as_deref() == Some(PASSWORD_REQUIRED_CODE)
            || self.details.iter().any(|d| d == PASSWORD_REQUIRED_MARKER)
    }

    /// Best human-readable reason in the body.
    pub fn reason(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Interpretation of a successful `POST /jobs` body.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResponse {
    /// Processing finished synchronously; the body is the result.
    Immediate(serde_json::Value),
    Queued { job_id: String },
    PasswordRequired { message: Option<String> },
}

impl SubmitResponse {
    pub fn from_body(body: serde_json::Value) -> Self {
        if body.get("passwordRequired").and_then(|v| v.as_bool()) == Some(true) {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string);
            return Self::PasswordRequired { message };
        }
        match body.get("jobId").and_then(|id| id.as_str()) {
            Some(job_id) if !job_id.is_empty() => Self::Queued {
                job_id: job_id.to_string(),
            },
            _ => Self::Immediate(body),
        }
    }
}
