// crates/core/src/store/memory.rs
//! Process-local job store.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use docjobs_types::Job;

use super::{dedupe, prune, upsert_into, JobStore};

/// Job store that lives only as long as the process.
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
    retention: Duration,
}

impl MemoryJobStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            retention,
        }
    }

    /// Seed with existing records, as if loaded from a previous session.
    pub fn with_jobs(retention: Duration, mut jobs: Vec<Job>) -> Self {
        dedupe(&mut jobs);
        Self {
            jobs: Mutex::new(jobs),
            retention,
        }
    }

    fn with_lock<R>(&self, f: impl FnOnce(&mut Vec<Job>) -> R) -> R {
        let mut guard = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("job store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        };
        f(&mut guard)
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

impl JobStore for MemoryJobStore {
    fn load(&self) -> Vec<Job> {
        let retention = self.retention;
        self.with_lock(|jobs| {
            let mut view = jobs.clone();
            prune(&mut view, Utc::now(), retention);
            view
        })
    }

    fn save(&self, mut new_jobs: Vec<Job>) {
        prune(&mut new_jobs, Utc::now(), self.retention);
        dedupe(&mut new_jobs);
        self.with_lock(|jobs| *jobs = new_jobs);
    }

    fn upsert(&self, job: Job) {
        let retention = self.retention;
        self.with_lock(|jobs| {
            upsert_into(jobs, job);
            prune(jobs, Utc::now(), retention);
        });
    }

    fn remove(&self, id: &str) {
        self.with_lock(|jobs| jobs.retain(|j| j.id != id));
    }

    fn prune_terminal_older_than(&self, retention: Duration) {
        self.with_lock(|jobs| {
            prune(jobs, Utc::now(), retention);
        });
    }

    fn update(&self, id: &str, mutate: &mut dyn FnMut(&mut Job) -> bool) -> Option<Job> {
        let retention = self.retention;
        self.with_lock(|jobs| {
            let job = jobs.iter_mut().find(|j| j.id == id)?;
            let changed = mutate(job);
            let after = job.clone();
            if changed {
                prune(jobs, Utc::now(), retention);
            }
            Some(after)
        })
    }
}
