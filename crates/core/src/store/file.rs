// crates/core/src/store/file.rs
//! Durable job store backed by a single JSON file.
//!
//! The file holds a version-tagged envelope: `{"version": 2, "jobs": [...]}`.
//! A missing, truncated, or foreign-version file loads as an empty registry,
//! and individual malformed records are skipped. Writes go through a temp
//! file in the same directory followed by a rename, so a crash mid-write
//! leaves the previous registry intact.
//!
//! If a write fails (disk full, read-only mount, ...) the store logs once
//! and keeps serving from memory for the rest of the session.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use docjobs_types::Job;
use serde::{Deserialize, Serialize};

use super::{dedupe, prune, upsert_into, JobStore};
use crate::error::StoreError;

/// Bumped whenever the record schema changes incompatibly.
pub const STORE_VERSION: u32 = 2;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    jobs: &'a [Job],
}

#[derive(Deserialize)]
struct RawEnvelope {
    version: u32,
    #[serde(default)]
    jobs: Vec<serde_json::Value>,
}

struct State {
    jobs: Vec<Job>,
    loaded: bool,
    degraded: bool,
}

pub struct FileJobStore {
    path: PathBuf,
    retention: Duration,
    state: Mutex<State>,
}

impl FileJobStore {
    pub fn new(path: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            path: path.into(),
            retention,
            state: Mutex::new(State {
                jobs: Vec::new(),
                loaded: false,
                degraded: false,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once a write has failed and the store stopped touching disk.
    pub fn is_degraded(&self) -> bool {
        self.with_state(|state| state.degraded)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(path = %self.path.display(), "job store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if !guard.loaded {
            guard.jobs = match read_jobs(&self.path) {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::warn!(error = %e, "discarding unreadable job store");
                    Vec::new()
                }
            };
            guard.loaded = true;
        }
        f(&mut guard)
    }

    /// Prune, then write unless degraded. Called with the lock held.
    fn commit(&self, state: &mut State) {
        prune(&mut state.jobs, Utc::now(), self.retention);
        if state.degraded {
            return;
        }
        if let Err(e) = write_jobs(&self.path, &state.jobs) {
            tracing::warn!(
                error = %e,
                "job store write failed; tracking in memory for this session"
            );
            state.degraded = true;
        }
    }
}

impl JobStore for FileJobStore {
    fn load(&self) -> Vec<Job> {
        self.with_state(|state| {
            let mut view = state.jobs.clone();
            prune(&mut view, Utc::now(), self.retention);
            view
        })
    }

    fn save(&self, mut jobs: Vec<Job>) {
        dedupe(&mut jobs);
        self.with_state(|state| {
            state.jobs = jobs;
            self.commit(state);
        });
    }

    fn upsert(&self, job: Job) {
        self.with_state(|state| {
            upsert_into(&mut state.jobs, job);
            self.commit(state);
        });
    }

    fn remove(&self, id: &str) {
        self.with_state(|state| {
            let before = state.jobs.len();
            state.jobs.retain(|j| j.id != id);
            if state.jobs.len() != before {
                self.commit(state);
            }
        });
    }

    fn prune_terminal_older_than(&self, retention: Duration) {
        self.with_state(|state| {
            if prune(&mut state.jobs, Utc::now(), retention) > 0 {
                self.commit(state);
            }
        });
    }

    fn update(&self, id: &str, mutate: &mut dyn FnMut(&mut Job) -> bool) -> Option<Job> {
        self.with_state(|state| {
            let job = state.jobs.iter_mut().find(|j| j.id == id)?;
            let changed = mutate(job);
            let after = job.clone();
            if changed {
                self.commit(state);
            }
            Some(after)
        })
    }
}

fn read_jobs(path: &Path) -> Result<Vec<Job>, StoreError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let envelope: RawEnvelope =
        serde_json::from_slice(&raw).map_err(|e| StoreError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if envelope.version != STORE_VERSION {
        return Err(StoreError::Version {
            path: path.to_path_buf(),
            found: envelope.version,
            expected: STORE_VERSION,
        });
    }

    let total = envelope.jobs.len();
    let mut jobs: Vec<Job> = envelope
        .jobs
        .into_iter()
        .filter_map(|value| serde_json::from_value::<Job>(value).ok())
        .collect();
    if jobs.len() != total {
        tracing::warn!(
            skipped = total - jobs.len(),
            path = %path.display(),
            "skipped malformed job records"
        );
    }
    dedupe(&mut jobs);
    Ok(jobs)
}

fn write_jobs(path: &Path, jobs: &[Job]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let body = serde_json::to_vec(&EnvelopeRef {
        version: STORE_VERSION,
        jobs,
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(&body).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}
