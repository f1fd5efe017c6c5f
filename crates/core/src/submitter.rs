// crates/core/src/submitter.rs
//! Initial transmission of a document and classification of the reply.

use std::sync::Arc;

use docjobs_types::{Job, SubmitResponse};
use serde_json::Value;
use thiserror::Error;

use crate::document::{Document, DocumentLimits};
use crate::error::{ServiceError, ValidationError};
use crate::service::JobService;

/// How the server answered a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResult {
    /// Processed synchronously; the body is the result.
    Immediate(Value),
    /// Accepted for asynchronous processing under this job id.
    Queued(String),
    /// The document needs a password. Carries the server's explanation.
    PasswordRequired(Option<String>),
}

impl SubmitResult {
    /// Move `job` to the state this result implies.
    pub fn apply_to(&self, job: &mut Job) {
        match self {
            Self::Immediate(body) => {
                let result = (!body.is_null()).then(|| body.clone());
                job.mark_success(result);
            }
            Self::Queued(job_id) => job.mark_queued(job_id.as_str()),
            Self::PasswordRequired(message) => job.mark_password_required(message.clone()),
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Queued(job_id) => Some(job_id),
            _ => None,
        }
    }
}

impl From<SubmitResponse> for SubmitResult {
    fn from(response: SubmitResponse) -> Self {
        match response {
            SubmitResponse::Immediate(body) => Self::Immediate(body),
            SubmitResponse::Queued { job_id } => Self::Queued(job_id),
            SubmitResponse::PasswordRequired { message } => Self::PasswordRequired(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl SubmitError {
    /// Text for a job record that failed to submit.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Service(e) => e.user_message(),
        }
    }
}

/// Validates documents and sends them to the job service.
pub struct JobSubmitter {
    service: Arc<dyn JobService>,
    limits: DocumentLimits,
}

impl JobSubmitter {
    pub fn new(service: Arc<dyn JobService>, limits: DocumentLimits) -> Self {
        Self { service, limits }
    }

    pub fn limits(&self) -> &DocumentLimits {
        &self.limits
    }

    /// Local checks only; never touches the network.
    pub fn validate(&self, document: &Document) -> Result<(), ValidationError> {
        self.limits.check(document)
    }

    /// Validate, then transmit `document` with an optional password.
    pub async fn submit(
        &self,
        document: &Document,
        password: Option<&str>,
    ) -> Result<SubmitResult, SubmitError> {
        self.validate(document)?;
        tracing::debug!(
            filename = %document.filename,
            size = document.size(),
            with_password = password.is_some(),
            "submitting document"
        );
        let response = self.service.submit(document, password).await?;
        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::UpdateStream;
    use async_trait::async_trait;
    use docjobs_types::{JobStatus, JobUpdate};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Canned {
        reply: Mutex<Option<Result<SubmitResponse, ServiceError>>>,
        calls: AtomicUsize,
        last_password: Mutex<Option<String>>,
    }

    impl Canned {
        fn new(reply: Result<SubmitResponse, ServiceError>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                calls: AtomicUsize::new(0),
                last_password: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl JobService for Canned {
        async fn submit(
            &self,
            _: &Document,
            password: Option<&str>,
        ) -> Result<SubmitResponse, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_password.lock().unwrap() = password.map(str::to_string);
            self.reply.lock().unwrap().take().unwrap()
        }

        async fn fetch_status(&self, _: &str) -> Result<JobUpdate, ServiceError> {
            unreachable!()
        }

        async fn open_stream(&self, _: &str) -> Result<UpdateStream, ServiceError> {
            unreachable!()
        }
    }

    fn pdf(size: usize) -> Document {
        Document::pdf("statement.pdf", vec![b'%'; size])
    }

    #[tokio::test]
    async fn test_oversized_document_never_sent() {
        let service = Canned::new(Ok(SubmitResponse::Queued {
            job_id: "J1".into(),
        }));
        let limits = DocumentLimits {
            max_bytes: 1024,
            ..DocumentLimits::default()
        };
        let submitter = JobSubmitter::new(service.clone(), limits);

        let err = submitter.submit(&pdf(2048), None).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::TooLarge { .. })
        ));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_type_rejected_locally() {
        let service = Canned::new(Ok(SubmitResponse::Immediate(Value::Null)));
        let submitter = JobSubmitter::new(service.clone(), DocumentLimits::default());
        let doc = Document::new("notes.txt", "text/plain", b"hello".to_vec());

        let err = submitter.submit(&doc, None).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::UnsupportedType { .. })
        ));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_queued_with_password() {
        let service = Canned::new(Ok(SubmitResponse::Queued {
            job_id: "J2".into(),
        }));
        let submitter = JobSubmitter::new(service.clone(), DocumentLimits::default());

        let result = submitter.submit(&pdf(64), Some("correct")).await.unwrap();
        assert_eq!(result, SubmitResult::Queued("J2".into()));
        assert_eq!(result.job_id(), Some("J2"));
        assert_eq!(
            service.last_password.lock().unwrap().as_deref(),
            Some("correct")
        );
    }

    #[tokio::test]
    async fn test_server_error_surfaces_message() {
        let service = Canned::new(Err(ServiceError::Server {
            status: 422,
            message: "Unsupported bank format".into(),
        }));
        let submitter = JobSubmitter::new(service, DocumentLimits::default());

        let err = submitter.submit(&pdf(64), None).await.unwrap_err();
        assert_eq!(err.user_message(), "Unsupported bank format");
    }

    #[test]
    fn test_apply_results() {
        let mut job = Job::new("a.pdf");
        SubmitResult::PasswordRequired(Some("Password needed".into())).apply_to(&mut job);
        assert_eq!(job.status, JobStatus::PasswordRequired);
        assert_eq!(job.error.as_deref(), Some("Password needed"));

        SubmitResult::Queued("J9".into()).apply_to(&mut job);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 0);
        assert_eq!(job.job_id.as_deref(), Some("J9"));
        assert_eq!(job.error, None);

        let mut sync = Job::new("b.pdf");
        SubmitResult::Immediate(serde_json::json!({"rows": 12})).apply_to(&mut sync);
        assert_eq!(sync.status, JobStatus::Success);
        assert_eq!(sync.progress, 100);
        assert_eq!(sync.result, Some(serde_json::json!({"rows": 12})));
    }
}
