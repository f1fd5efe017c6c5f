// Scripted job service shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use docjobs_core::{Document, JobService, ServiceError, UpdateStream};
use docjobs_types::{Job, JobStatus, JobUpdate, SubmitResponse};
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type StreamTx = mpsc::UnboundedSender<Result<JobUpdate, ServiceError>>;

/// In-memory stand-in for the job service.
///
/// - submissions are answered from a queue, in order
/// - status queries are answered per job id, falling back to "processing"
/// - each job id may have one scripted push stream; without one, opening the
///   stream fails like an unreachable endpoint
#[derive(Default)]
pub struct FakeService {
    submit_replies: Mutex<VecDeque<Result<SubmitResponse, ServiceError>>>,
    passwords: Mutex<Vec<Option<String>>>,
    status_replies: Mutex<HashMap<String, VecDeque<Result<JobUpdate, ServiceError>>>>,
    status_calls: Mutex<Vec<(String, Instant)>>,
    streams: Mutex<HashMap<String, mpsc::UnboundedReceiver<Result<JobUpdate, ServiceError>>>>,
    streams_opened: Mutex<Vec<String>>,
    submit_gate: Mutex<Option<oneshot::Receiver<()>>>,
    submit_held: Notify,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_submit(&self, reply: Result<SubmitResponse, ServiceError>) {
        self.submit_replies.lock().unwrap().push_back(reply);
    }

    pub fn queued(&self, job_id: &str) {
        self.reply_submit(Ok(SubmitResponse::Queued {
            job_id: job_id.to_string(),
        }));
    }

    pub fn reply_status(&self, job_id: &str, reply: Result<JobUpdate, ServiceError>) {
        self.status_replies
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Script a push stream for `job_id`. Dropping the sender ends it.
    pub fn stream_for(&self, job_id: &str) -> StreamTx {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().insert(job_id.to_string(), rx);
        tx
    }

    /// Hold the next submission, after its reply is taken, until the
    /// returned sender fires or is dropped.
    pub fn hold_next_submit(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.submit_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Resolves once a held submission is waiting.
    pub async fn submit_held(&self) {
        self.submit_held.notified().await
    }

    pub fn passwords(&self) -> Vec<Option<String>> {
        self.passwords.lock().unwrap().clone()
    }

    pub fn status_calls(&self, job_id: &str) -> Vec<Instant> {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn total_status_calls(&self) -> usize {
        self.status_calls.lock().unwrap().len()
    }

    pub fn streams_opened(&self, job_id: &str) -> usize {
        self.streams_opened
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == job_id)
            .count()
    }

    pub fn total_streams_opened(&self) -> usize {
        self.streams_opened.lock().unwrap().len()
    }
}

#[async_trait]
impl JobService for FakeService {
    async fn submit(
        &self,
        _document: &Document,
        password: Option<&str>,
    ) -> Result<SubmitResponse, ServiceError> {
        self.passwords
            .lock()
            .unwrap()
            .push(password.map(str::to_string));
        let reply = self
            .submit_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::transport("no submit reply scripted")));
        let gate = self.submit_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.submit_held.notify_one();
            let _ = gate.await;
        }
        reply
    }

    async fn fetch_status(&self, job_id: &str) -> Result<JobUpdate, ServiceError> {
        self.status_calls
            .lock()
            .unwrap()
            .push((job_id.to_string(), Instant::now()));
        self.status_replies
            .lock()
            .unwrap()
            .get_mut(job_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(JobUpdate::new(JobStatus::Processing, None, None)))
    }

    async fn open_stream(&self, job_id: &str) -> Result<UpdateStream, ServiceError> {
        self.streams_opened.lock().unwrap().push(job_id.to_string());
        match self.streams.lock().unwrap().remove(job_id) {
            Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            None => Err(ServiceError::transport("connection refused")),
        }
    }
}

pub fn processing(progress: u8) -> Result<JobUpdate, ServiceError> {
    Ok(JobUpdate::new(JobStatus::Processing, Some(progress), None))
}

pub fn success() -> Result<JobUpdate, ServiceError> {
    Ok(JobUpdate::new(JobStatus::Success, Some(100), None))
}

pub fn pdf(name: &str, size: usize) -> Document {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(size.max(bytes.len()), b' ');
    Document::pdf(name, bytes)
}

/// Next broadcast record matching `pred`; skips everything else.
pub async fn wait_for(rx: &mut broadcast::Receiver<Job>, pred: impl Fn(&Job) -> bool) -> Job {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(job) if pred(&job) => return job,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("tracker dropped"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .expect("timed out waiting for job update")
}
