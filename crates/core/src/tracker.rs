// crates/core/src/tracker.rs
//! Subsystem root: owns the store, the channel registry and the password
//! flow, and drives every job from submission to a terminal state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashSet;
use docjobs_types::{ApplyOutcome, Job, JobStatus, JobUpdate};
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;

use crate::channel::{
    ChannelKind, ChannelOutcome, Delivery, PollChannel, PushChannel, UpdateChannel, UpdateSink,
};
use crate::config::TrackerConfig;
use crate::document::{Document, DocumentLimits};
use crate::error::{ServiceError, TrackerError};
use crate::password::{PasswordRetryFlow, PendingPrompt};
use crate::reconciler::INTERRUPTED_MESSAGE;
use crate::registry::{ChannelRegistry, Lease};
use crate::service::{HttpJobService, JobService};
use crate::store::{self, FileJobStore, JobStore};
use crate::submitter::{JobSubmitter, SubmitResult};

pub const DISMISSED_MESSAGE: &str = "Password not provided";

const UPDATE_BUFFER: usize = 256;

/// Tracks asynchronous document jobs on behalf of a UI.
///
/// Cheap to clone; clones share one subsystem. Every committed mutation is
/// broadcast to [`JobTracker::subscribe`] receivers.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<Inner>,
}

struct Inner {
    config: TrackerConfig,
    store: Arc<dyn JobStore>,
    service: Arc<dyn JobService>,
    submitter: JobSubmitter,
    push: PushChannel,
    poll: PollChannel,
    channels: ChannelRegistry,
    flow: Mutex<PasswordRetryFlow>,
    /// Local ids whose upload request is on the wire.
    in_flight: DashSet<String>,
    updates: broadcast::Sender<Job>,
    tasks: TaskTracker,
    closed: AtomicBool,
}

impl JobTracker {
    pub fn new(
        config: TrackerConfig,
        store: Arc<dyn JobStore>,
        service: Arc<dyn JobService>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let inner = Inner {
            submitter: JobSubmitter::new(service.clone(), DocumentLimits::from_config(&config)),
            push: PushChannel::new(service.clone()),
            poll: PollChannel::new(service.clone(), config.poll),
            channels: ChannelRegistry::new(),
            flow: Mutex::new(PasswordRetryFlow::new()),
            in_flight: DashSet::new(),
            updates,
            tasks: TaskTracker::new(),
            closed: AtomicBool::new(false),
            config,
            store,
            service,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Production wiring: file store at the configured path, HTTP service.
    pub fn from_config(config: TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;
        let path = config.resolved_store_path()?;
        tracing::info!(store = %path.display(), api_url = %config.api_url, "job tracker starting");
        let store = Arc::new(FileJobStore::new(path, config.retention()));
        let service = Arc::new(HttpJobService::new(&config)?);
        Ok(Self::new(config, store, service))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Receive every job mutation committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.inner.updates.subscribe()
    }

    /// Current registry, most recent first.
    pub fn jobs(&self) -> Vec<Job> {
        self.inner.store.load()
    }

    pub fn job(&self, local_id: &str) -> Option<Job> {
        store::find(&self.inner.store.load(), local_id).cloned()
    }

    pub fn job_by_job_id(&self, job_id: &str) -> Option<Job> {
        store::find_by_job_id(&self.inner.store.load(), job_id).cloned()
    }

    /// Which channel follows `job_id` right now, if any.
    pub fn active_channel(&self, job_id: &str) -> Option<ChannelKind> {
        self.inner.channels.kind(job_id)
    }

    pub fn pending_prompt(&self) -> Option<PendingPrompt> {
        self.flow().pending()
    }

    /// Validate and upload a document.
    ///
    /// Returns once the server has classified the upload. While a password
    /// prompt is outstanding the document is held instead and the returned
    /// record stays `uploading` until its turn comes.
    pub async fn submit(&self, document: Document) -> Result<Job, TrackerError> {
        self.ensure_open()?;
        self.inner.submitter.validate(&document)?;

        let job = Job::new(document.filename.as_str());
        let local_id = job.id.clone();
        self.inner.store.upsert(job.clone());
        self.publish(&job);

        let deferred = {
            let mut flow = self.flow();
            if flow.should_defer() {
                flow.defer(local_id.clone(), document.clone());
                Some(flow.claim_drain())
            } else {
                self.inner.in_flight.insert(local_id.clone());
                None
            }
        };
        if let Some(start_drain) = deferred {
            if start_drain {
                self.spawn_drain();
            }
            return Ok(job);
        }

        self.transmit(&local_id, document).await
    }

    /// Resubmit the prompted document with `password`.
    pub async fn submit_password(&self, password: &str) -> Result<Job, TrackerError> {
        self.ensure_open()?;
        let (local_id, document) = self.flow().begin_submit()?;
        tracing::info!(local_id = %local_id, "retrying with password");

        let outcome = self.inner.submitter.submit(&document, Some(password)).await;
        let job = match outcome {
            Ok(SubmitResult::PasswordRequired(message)) => {
                let shown = self.flow().rejected(&local_id, message);
                match shown {
                    Some(shown) => {
                        tracing::info!(local_id = %local_id, "password rejected");
                        self.mutate(&local_id, |job| {
                            job.mark_password_required(Some(shown.clone()))
                        })
                    }
                    None => None,
                }
            }
            Ok(result) => {
                let job = self.mutate(&local_id, |job| result.apply_to(job));
                self.flow().resolve(&local_id);
                if let Some(job) = &job {
                    self.start_updates(job);
                }
                job
            }
            Err(e) => {
                tracing::warn!(local_id = %local_id, error = %e, "password resubmission failed");
                let job = self.mutate(&local_id, |job| job.mark_failed(e.user_message()));
                self.flow().resolve(&local_id);
                job
            }
        };
        self.resume_deferred();
        job.ok_or(TrackerError::UnknownJob { id: local_id })
    }

    /// Give up on the prompted document. Its record fails and held uploads
    /// proceed.
    pub fn dismiss_password_prompt(&self) -> Result<Job, TrackerError> {
        let local_id = self.flow().dismiss()?;
        tracing::info!(local_id = %local_id, "password prompt dismissed");
        let job = self.mutate(&local_id, |job| job.mark_failed(DISMISSED_MESSAGE));
        self.resume_deferred();
        job.ok_or(TrackerError::UnknownJob { id: local_id })
    }

    /// Drop a record, closing its channel. Returns whether it existed.
    pub fn remove(&self, local_id: &str) -> bool {
        let Some(job) = self.job(local_id) else {
            return false;
        };
        if let Some(job_id) = &job.job_id {
            self.inner.channels.close(job_id);
        }
        self.flow().forget(local_id);
        self.inner.store.remove(local_id);
        tracing::info!(local_id, job_id = ?job.job_id, "job removed");
        self.resume_deferred();
        true
    }

    /// Remove every terminal record. Returns how many went.
    pub fn clear_completed(&self) -> usize {
        let done: Vec<String> = self
            .jobs()
            .into_iter()
            .filter(Job::is_terminal)
            .map(|job| job.id)
            .collect();
        for local_id in &done {
            self.inner.store.remove(local_id);
        }
        if !done.is_empty() {
            tracing::info!(count = done.len(), "cleared completed jobs");
        }
        done.len()
    }

    /// Close every channel and wait for all background work to stop.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.channels.close_all();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!("job tracker stopped");
    }

    // -- internals shared with the reconciler --

    pub(crate) fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub(crate) fn service(&self) -> &Arc<dyn JobService> {
        &self.inner.service
    }

    pub(crate) fn is_tracking_channel(&self, job_id: &str) -> bool {
        self.inner.channels.is_active(job_id)
    }

    /// The record's document is still in memory here: mid-upload, prompted,
    /// or waiting its turn.
    pub(crate) fn holds_document(&self, local_id: &str) -> bool {
        let flow = self.flow();
        flow.holds(local_id) || self.inner.in_flight.contains(local_id)
    }

    /// Apply a server update to a record, honoring terminal finality.
    pub(crate) fn apply_update(&self, local_id: &str, update: &JobUpdate) -> Option<(Job, ApplyOutcome)> {
        let mut outcome = ApplyOutcome::Unchanged;
        let job = self.inner.store.update(local_id, &mut |job| {
            outcome = job.apply(update);
            outcome == ApplyOutcome::Applied
        })?;
        if outcome == ApplyOutcome::Applied {
            if job.is_terminal() {
                tracing::info!(
                    local_id,
                    job_id = ?job.job_id,
                    status = %job.status,
                    error = ?job.error,
                    "job finished"
                );
            } else {
                tracing::debug!(
                    local_id,
                    job_id = ?job.job_id,
                    status = %job.status,
                    progress = job.progress,
                    "job progress"
                );
            }
            self.publish(&job);
        }
        Some((job, outcome))
    }

    pub(crate) fn mutate(&self, local_id: &str, mut f: impl FnMut(&mut Job)) -> Option<Job> {
        let job = self.inner.store.update(local_id, &mut |job| {
            f(job);
            true
        });
        match &job {
            Some(job) => self.publish(job),
            None => tracing::debug!(local_id, "record vanished before update"),
        }
        job
    }

    /// Open the push channel for a queued job. No-op for terminal jobs, jobs
    /// without a server id, and jobs that already have a channel.
    pub(crate) fn start_updates(&self, job: &Job) -> bool {
        let Some(job_id) = job.job_id.as_deref() else {
            return false;
        };
        if job.is_terminal() || job.status == JobStatus::PasswordRequired {
            return false;
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        let Some(lease) = self.inner.channels.claim(job_id, ChannelKind::Push) else {
            tracing::debug!(job_id, "channel already active");
            return false;
        };
        tracing::info!(local_id = %job.id, job_id, channel = %lease.kind, "following job");
        let this = self.clone();
        let local_id = job.id.clone();
        self.inner
            .tasks
            .spawn(async move { this.drive(local_id, lease).await });
        true
    }

    // -- internals --

    fn ensure_open(&self) -> Result<(), TrackerError> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(TrackerError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn flow(&self) -> MutexGuard<'_, PasswordRetryFlow> {
        self.inner.flow.lock().unwrap_or_else(|poisoned| {
            tracing::error!("password flow lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn publish(&self, job: &Job) {
        // No receivers is fine.
        let _ = self.inner.updates.send(job.clone());
    }

    /// Send a document that is already marked in flight and settle its record.
    async fn transmit(&self, local_id: &str, document: Document) -> Result<Job, TrackerError> {
        let mut guard = InFlight {
            tracker: self,
            local_id,
            settled: false,
        };
        let outcome = self.inner.submitter.submit(&document, None).await;
        guard.settled = true;
        let job = match outcome {
            Ok(result) => {
                let job = self.mutate(local_id, |job| result.apply_to(job));
                match (&result, &job) {
                    (SubmitResult::Queued(job_id), Some(job)) => {
                        tracing::info!(local_id, job_id = %job_id, "upload queued");
                        self.start_updates(job);
                    }
                    (SubmitResult::PasswordRequired(message), Some(_)) => {
                        tracing::info!(local_id, "upload needs a password");
                        self.flow()
                            .prompt(local_id.to_string(), message.clone(), document);
                    }
                    (SubmitResult::Immediate(_), Some(_)) => {
                        tracing::info!(local_id, "upload processed synchronously");
                    }
                    (_, None) => {}
                }
                job
            }
            Err(e) => {
                tracing::warn!(local_id, error = %e, "upload failed");
                self.mutate(local_id, |job| job.mark_failed(e.user_message()))
            }
        };
        drop(guard);
        job.ok_or_else(|| TrackerError::UnknownJob {
            id: local_id.to_string(),
        })
    }

    fn resume_deferred(&self) {
        let start = self.flow().claim_drain();
        if start {
            self.spawn_drain();
        }
    }

    fn spawn_drain(&self) {
        let this = self.clone();
        self.inner.tasks.spawn(async move { this.drain().await });
    }

    /// Upload held documents one at a time until the queue empties or a new
    /// prompt opens.
    async fn drain(&self) {
        loop {
            if self.inner.closed.load(Ordering::Acquire) {
                return;
            }
            let next = {
                let mut flow = self.flow();
                let next = flow.next_deferred();
                if let Some((local_id, _)) = &next {
                    self.inner.in_flight.insert(local_id.clone());
                }
                next
            };
            let Some((local_id, document)) = next else {
                return;
            };
            if let Err(e) = self.transmit(&local_id, document).await {
                tracing::debug!(local_id = %local_id, error = %e, "held upload dropped");
            }
        }
    }

    /// Push first; polling only after the push transport failed. Both run
    /// under one registry lease so a job never has two channels.
    async fn drive(&self, local_id: String, lease: Lease) {
        let sink = JobSink {
            tracker: self,
            local_id: &local_id,
        };
        let cancel = lease.cancel_token();
        let job_id = lease.job_id.as_str();

        let outcome = match lease.kind {
            ChannelKind::Push => match self.inner.push.run(job_id, &sink, cancel.clone()).await {
                ChannelOutcome::TransportFailed(reason) if self.inner.channels.downgrade(&lease) => {
                    tracing::info!(
                        local_id = %local_id,
                        job_id,
                        reason = %reason,
                        initial_delay_ms = self.inner.config.poll.initial_delay_ms,
                        "push channel lost; polling"
                    );
                    self.inner.poll.run(job_id, &sink, cancel).await
                }
                other => other,
            },
            ChannelKind::Poll => self.inner.poll.run(job_id, &sink, cancel).await,
        };

        match outcome {
            ChannelOutcome::NotFound => {
                let message = ServiceError::NotFound {
                    job_id: job_id.to_string(),
                }
                .user_message();
                self.apply_update(
                    &local_id,
                    &JobUpdate::new(JobStatus::Error, None, Some(message)),
                );
            }
            ChannelOutcome::Exhausted { attempts } => {
                tracing::warn!(
                    local_id = %local_id,
                    job_id,
                    attempts,
                    "gave up polling; job left as last seen"
                );
            }
            other => {
                tracing::debug!(local_id = %local_id, job_id, outcome = ?other, "channel stopped");
            }
        }
        self.inner.channels.release(&lease);
    }
}

/// Clears the in-flight mark when an upload ends. An upload dropped before
/// the server answered leaves its record failed, not `uploading`.
struct InFlight<'a> {
    tracker: &'a JobTracker,
    local_id: &'a str,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.tracker.inner.in_flight.remove(self.local_id);
        if !self.settled {
            tracing::warn!(local_id = self.local_id, "upload abandoned before the server answered");
            self.tracker.apply_update(
                self.local_id,
                &JobUpdate::new(JobStatus::Error, None, Some(INTERRUPTED_MESSAGE.to_string())),
            );
        }
    }
}

/// Writes channel updates into one record.
struct JobSink<'a> {
    tracker: &'a JobTracker,
    local_id: &'a str,
}

impl UpdateSink for JobSink<'_> {
    fn deliver(&self, update: JobUpdate) -> Delivery {
        let Some((job, outcome)) = self.tracker.apply_update(self.local_id, &update) else {
            return Delivery::Gone;
        };
        if outcome == ApplyOutcome::IgnoredTerminal {
            tracing::debug!(local_id = self.local_id, "late update for finished job ignored");
        }
        if job.is_terminal() {
            Delivery::Terminal
        } else if job.status == JobStatus::PasswordRequired {
            Delivery::Paused
        } else {
            Delivery::Continue
        }
    }
}
