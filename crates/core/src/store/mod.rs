// crates/core/src/store/mod.rs
//! Persisted registry of tracked jobs.
//!
//! Provides:
//! - `JobStore`: the storage contract used by the tracker
//! - `MemoryJobStore`: process-local store (tests, storage-less hosts)
//! - `FileJobStore`: durable JSON file, degrades to memory on write failure
//!
//! Records are keyed by the client-side `id`; no two records share a
//! server `jobId`. New records go to the front (most recent first).
//! Every write prunes terminal records older than the retention window.

pub mod file;
pub mod memory;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

use std::time::Duration;

use chrono::{DateTime, Utc};
use docjobs_types::Job;

/// Storage contract for the job registry.
///
/// Implementations never fail the caller: unreadable storage loads as empty
/// and write errors are logged and absorbed.
pub trait JobStore: Send + Sync {
    /// All records, minus terminal ones past the retention window.
    fn load(&self) -> Vec<Job>;

    /// Replace the whole registry.
    fn save(&self, jobs: Vec<Job>);

    /// Insert at the front, or replace the record with the same `id` (or the
    /// same `jobId`) in place. Stamps `updatedAt`.
    fn upsert(&self, job: Job);

    /// Drop the record with this local `id`.
    fn remove(&self, id: &str);

    fn prune_terminal_older_than(&self, retention: Duration);

    /// Read-modify-write of a single record under the store's lock.
    ///
    /// `mutate` returns whether it changed anything; only then is the
    /// collection written back. Returns the record after `mutate`, or `None`
    /// when no record has this `id`.
    fn update(&self, id: &str, mutate: &mut dyn FnMut(&mut Job) -> bool) -> Option<Job>;
}

/// Look a record up by local id.
pub fn find<'a>(jobs: &'a [Job], id: &str) -> Option<&'a Job> {
    jobs.iter().find(|j| j.id == id)
}

/// Look a record up by server job id.
pub fn find_by_job_id<'a>(jobs: &'a [Job], job_id: &str) -> Option<&'a Job> {
    jobs.iter().find(|j| j.job_id.as_deref() == Some(job_id))
}

pub(crate) fn is_expired(job: &Job, now: DateTime<Utc>, retention: Duration) -> bool {
    if !job.is_terminal() {
        return false;
    }
    let age = now.signed_duration_since(job.updated_at);
    match chrono::Duration::from_std(retention) {
        Ok(window) => age > window,
        Err(_) => false,
    }
}

/// Drop terminal records whose `updatedAt` is older than `retention`.
/// Active and paused records are kept regardless of age.
pub(crate) fn prune(jobs: &mut Vec<Job>, now: DateTime<Utc>, retention: Duration) -> usize {
    let before = jobs.len();
    jobs.retain(|j| !is_expired(j, now, retention));
    before - jobs.len()
}

/// Upsert semantics shared by every store.
pub(crate) fn upsert_into(jobs: &mut Vec<Job>, mut job: Job) {
    job.updated_at = Utc::now();
    let matches = |existing: &Job| {
        existing.id == job.id
            || (job.job_id.is_some() && existing.job_id.as_deref() == job.job_id.as_deref())
    };
    match jobs.iter().position(matches) {
        Some(idx) => {
            let (id, job_id) = (job.id.clone(), job.job_id.clone());
            jobs[idx] = job;
            // A second record for the same jobId can only be a stale copy.
            let mut seen = false;
            jobs.retain(|j| {
                let same = j.id == id || (job_id.is_some() && j.job_id == job_id);
                if !same {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
        }
        None => jobs.insert(0, job),
    }
}

/// Collapse duplicate `jobId`s, keeping the first (most recent) record.
pub(crate) fn dedupe(jobs: &mut Vec<Job>) {
    let mut seen_ids = std::collections::HashSet::new();
    let mut seen_job_ids = std::collections::HashSet::new();
    jobs.retain(|j| {
        if !seen_ids.insert(j.id.clone()) {
            return false;
        }
        match &j.job_id {
            Some(job_id) => seen_job_ids.insert(job_id.clone()),
            None => true,
        }
    });
}
