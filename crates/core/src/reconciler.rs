// crates/core/src/reconciler.rs
//! Cold-start alignment of persisted jobs with the server.

use docjobs_types::{Job, JobStatus, JobUpdate};
use futures_util::future::join_all;
use serde::Serialize;

use crate::error::ServiceError;
use crate::tracker::JobTracker;

pub const INTERRUPTED_MESSAGE: &str = "Upload interrupted";

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Records loaded after pruning.
    pub loaded: usize,
    /// Server reported success or failure; no channel opened.
    pub finished: usize,
    /// Still active on the server; now followed by a channel.
    pub resumed: usize,
    /// Already followed by a channel from an earlier pass or a live upload.
    pub already_tracked: usize,
    /// Server no longer knows the job.
    pub not_found: usize,
    /// Never reached the server and the document is gone.
    pub interrupted: usize,
    /// Waiting on a password the server asked for.
    pub awaiting_password: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Finished,
    Resumed,
    AlreadyTracked,
    NotFound,
    Interrupted,
    AwaitingPassword,
}

impl ReconcileReport {
    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Finished => self.finished += 1,
            Verdict::Resumed => self.resumed += 1,
            Verdict::AlreadyTracked => self.already_tracked += 1,
            Verdict::NotFound => self.not_found += 1,
            Verdict::Interrupted => self.interrupted += 1,
            Verdict::AwaitingPassword => self.awaiting_password += 1,
        }
    }
}

impl JobTracker {
    /// Load the persisted registry and bring every non-terminal record up to
    /// date with the server, resuming channels for jobs still running.
    ///
    /// Safe to call repeatedly: records are updated in place and the channel
    /// registry refuses a second channel for a job.
    pub async fn reconcile(&self) -> ReconcileReport {
        let store = self.store().clone();
        store.prune_terminal_older_than(self.config().retention());
        let jobs = store.load();

        let mut report = ReconcileReport {
            loaded: jobs.len(),
            ..ReconcileReport::default()
        };
        let pending = jobs
            .into_iter()
            .filter(|job| !job.is_terminal())
            .map(|job| self.reconcile_job(job));
        for verdict in join_all(pending).await.into_iter().flatten() {
            report.record(verdict);
        }

        tracing::info!(
            loaded = report.loaded,
            finished = report.finished,
            resumed = report.resumed,
            already_tracked = report.already_tracked,
            not_found = report.not_found,
            interrupted = report.interrupted,
            "reconciled persisted jobs"
        );
        report
    }

    async fn reconcile_job(&self, job: Job) -> Option<Verdict> {
        let Some(job_id) = job.job_id.clone() else {
            if self.holds_document(&job.id) {
                return None;
            }
            tracing::info!(local_id = %job.id, filename = %job.filename, "upload interrupted by restart");
            self.apply_update(
                &job.id,
                &JobUpdate::new(JobStatus::Error, None, Some(INTERRUPTED_MESSAGE.to_string())),
            );
            return Some(Verdict::Interrupted);
        };

        if self.is_tracking_channel(&job_id) {
            return Some(Verdict::AlreadyTracked);
        }

        match self.service().fetch_status(&job_id).await {
            Ok(update) => {
                let (job, _) = self.apply_update(&job.id, &update)?;
                if job.is_terminal() {
                    tracing::info!(job_id = %job_id, status = %job.status, "finished while away");
                    Some(Verdict::Finished)
                } else if job.status == JobStatus::PasswordRequired {
                    Some(Verdict::AwaitingPassword)
                } else if self.start_updates(&job) {
                    Some(Verdict::Resumed)
                } else {
                    Some(Verdict::AlreadyTracked)
                }
            }
            Err(ServiceError::NotFound { .. }) => {
                let message = ServiceError::NotFound {
                    job_id: job_id.clone(),
                }
                .user_message();
                tracing::info!(job_id = %job_id, "job unknown to the server");
                self.apply_update(&job.id, &JobUpdate::new(JobStatus::Error, None, Some(message)));
                Some(Verdict::NotFound)
            }
            Err(e) => {
                // The channel's own fallback deals with an unreachable server.
                tracing::warn!(job_id = %job_id, error = %e, "status check failed; resuming anyway");
                if self.start_updates(&job) {
                    Some(Verdict::Resumed)
                } else {
                    Some(Verdict::AlreadyTracked)
                }
            }
        }
    }
}
