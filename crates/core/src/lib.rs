// crates/core/src/lib.rs
pub mod channel;
pub mod config;
pub mod document;
pub mod error;
pub mod password;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod store;
pub mod submitter;
pub mod tracker;

pub use channel::ChannelKind;
pub use config::*;
pub use document::*;
pub use error::*;
pub use password::PendingPrompt;
pub use reconciler::ReconcileReport;
pub use service::{HttpJobService, JobService, UpdateStream};
pub use store::{FileJobStore, JobStore, MemoryJobStore};
pub use submitter::{JobSubmitter, SubmitResult};
pub use tracker::JobTracker;

pub use docjobs_types::{Job, JobStatus, JobUpdate};
