// crates/types/src/job.rs
//! The tracked job record and its lifecycle transitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Message recorded when the server reports a failure without a reason.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Processing failed";

/// Lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../ui/src/types/generated/"))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploading,
    Processing,
    PasswordRequired,
    Success,
    Error,
}

impl JobStatus {
    /// `success` and `error` never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// `uploading` and `processing`: work is in flight and updates may arrive.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Uploading | Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::PasswordRequired => "password_required",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Map the server's status vocabulary onto ours.
    ///
    /// The job service speaks `PENDING`/`RUNNING`/`COMPLETED`/`FAILED`; newer
    /// deployments use the lowercase names. Both are accepted.
    pub fn from_remote(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "running" | "processing" => Some(Self::Processing),
            "uploading" => Some(Self::Uploading),
            "completed" | "complete" | "success" | "succeeded" => Some(Self::Success),
            "failed" | "error" => Some(Self::Error),
            "password_required" | "passwordrequired" => Some(Self::PasswordRequired),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized status update, whatever channel delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn new(status: JobStatus, progress: Option<u8>, error: Option<String>) -> Self {
        Self {
            status,
            progress,
            error,
        }
    }
}

/// Result of applying a [`JobUpdate`] to a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The record changed.
    Applied,
    /// Same values as already recorded (or a regressing progress value).
    Unchanged,
    /// The record is terminal; the update was dropped.
    IgnoredTerminal,
}

/// A tracked document processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../ui/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Client-generated id (ULID); identifies the record before the server
    /// has accepted the upload.
    pub id: String,
    /// Server-issued id, present once the job is queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub filename: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Body of a synchronous (immediate) result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh record for a document about to be transmitted.
    pub fn new(filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            job_id: None,
            filename: filename.into(),
            status: JobStatus::Uploading,
            progress: 0,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Apply a server-reported update.
    ///
    /// Terminal records are final. While active, progress never decreases.
    /// Once the server has issued a job id the upload is over, so a reported
    /// `uploading` counts as `processing`.
    pub fn apply(&mut self, update: &JobUpdate) -> ApplyOutcome {
        if self.is_terminal() {
            return ApplyOutcome::IgnoredTerminal;
        }
        let before = (self.status, self.progress, self.error.clone());

        let status = match update.status {
            JobStatus::Uploading if self.job_id.is_some() => JobStatus::Processing,
            status => status,
        };
        match status {
            JobStatus::Success => {
                self.status = JobStatus::Success;
                self.progress = 100;
                self.error = None;
            }
            JobStatus::Error => {
                self.status = JobStatus::Error;
                self.error = Some(
                    update
                        .error
                        .clone()
                        .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
                );
            }
            JobStatus::PasswordRequired => {
                self.status = JobStatus::PasswordRequired;
                self.error = update.error.clone();
            }
            status @ (JobStatus::Uploading | JobStatus::Processing) => {
                self.status = status;
                if let Some(progress) = update.progress {
                    self.progress = self.progress.max(progress.min(100));
                }
                self.error = None;
            }
        }

        if (self.status, self.progress, self.error.clone()) == before {
            ApplyOutcome::Unchanged
        } else {
            self.touch();
            ApplyOutcome::Applied
        }
    }

    /// The server queued (or re-queued, after a password retry) the document.
    ///
    /// This is the only transition that may lower `progress`.
    pub fn mark_queued(&mut self, job_id: impl Into<String>) {
        self.job_id = Some(job_id.into());
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.error = None;
        self.touch();
    }

    pub fn mark_password_required(&mut self, message: Option<String>) {
        self.status = JobStatus::PasswordRequired;
        self.error = message;
        self.touch();
    }

    pub fn mark_success(&mut self, result: Option<serde_json::Value>) {
        self.status = JobStatus::Success;
        self.progress = 100;
        self.error = None;
        self.result = result;
        self.touch();
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Error;
        self.error = Some(message.into());
        self.touch();
    }
}
