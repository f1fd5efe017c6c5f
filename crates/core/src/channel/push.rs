// crates/core/src/channel/push.rs
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{ChannelKind, ChannelOutcome, Delivery, UpdateChannel, UpdateSink};
use crate::service::JobService;

/// Server-pushed updates over the job's event stream.
pub struct PushChannel {
    service: Arc<dyn JobService>,
}

impl PushChannel {
    pub fn new(service: Arc<dyn JobService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl UpdateChannel for PushChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn run(
        &self,
        job_id: &str,
        sink: &dyn UpdateSink,
        cancel: CancellationToken,
    ) -> ChannelOutcome {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ChannelOutcome::Cancelled,
            opened = self.service.open_stream(job_id) => opened,
        };
        // A stream that cannot be opened is a transport problem too; a missing
        // job is confirmed by the poller rather than trusted from here.
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::info!(job_id, error = %e, "push stream unavailable");
                return ChannelOutcome::TransportFailed(e.to_string());
            }
        };
        tracing::debug!(job_id, "push stream open");

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ChannelOutcome::Cancelled,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(update)) => match sink.deliver(update) {
                    Delivery::Continue => {}
                    done => return ChannelOutcome::Finished(done),
                },
                Some(Err(e)) => {
                    tracing::info!(job_id, error = %e, "push stream failed");
                    return ChannelOutcome::TransportFailed(e.to_string());
                }
                None => {
                    tracing::info!(job_id, "push stream closed before the job finished");
                    return ChannelOutcome::TransportFailed("stream closed".to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::RecordingSink;
    use crate::document::Document;
    use crate::error::ServiceError;
    use crate::service::UpdateStream;
    use docjobs_types::{Job, JobStatus, JobUpdate, SubmitResponse};
    use std::sync::Mutex;

    /// Hands out one canned stream, then refuses.
    struct OneStream(Mutex<Option<Result<UpdateStream, ServiceError>>>);

    impl OneStream {
        fn items(items: Vec<Result<JobUpdate, ServiceError>>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Some(Ok(
                futures_util::stream::iter(items).boxed()
            )))))
        }

        fn failing(err: ServiceError) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Some(Err(err)))))
        }
    }

    #[async_trait]
    impl JobService for OneStream {
        async fn submit(
            &self,
            _: &Document,
            _: Option<&str>,
        ) -> Result<SubmitResponse, ServiceError> {
            unreachable!()
        }

        async fn fetch_status(&self, _: &str) -> Result<JobUpdate, ServiceError> {
            unreachable!()
        }

        async fn open_stream(&self, _: &str) -> Result<UpdateStream, ServiceError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(ServiceError::transport("already used")))
        }
    }

    fn queued() -> Job {
        let mut job = Job::new("a.pdf");
        job.mark_queued("J1");
        job
    }

    #[tokio::test]
    async fn test_runs_until_terminal() {
        let service = OneStream::items(vec![
            Ok(JobUpdate::new(JobStatus::Processing, Some(30), None)),
            Ok(JobUpdate::new(JobStatus::Processing, Some(70), None)),
            Ok(JobUpdate::new(JobStatus::Success, Some(100), None)),
            Ok(JobUpdate::new(JobStatus::Processing, Some(10), None)),
        ]);
        let sink = RecordingSink::new(queued());
        let outcome = PushChannel::new(service)
            .run("J1", &sink, CancellationToken::new())
            .await;

        assert_eq!(outcome, ChannelOutcome::Finished(Delivery::Terminal));
        assert_eq!(sink.seen.lock().unwrap().len(), 3);
        assert_eq!(sink.job().status, JobStatus::Success);
        assert_eq!(sink.job().progress, 100);
    }

    #[tokio::test]
    async fn test_early_close_is_transport_failure() {
        let service = OneStream::items(vec![Ok(JobUpdate::new(
            JobStatus::Processing,
            Some(20),
            None,
        ))]);
        let sink = RecordingSink::new(queued());
        let outcome = PushChannel::new(service)
            .run("J1", &sink, CancellationToken::new())
            .await;
        assert!(matches!(outcome, ChannelOutcome::TransportFailed(_)));
        assert_eq!(sink.job().progress, 20);
    }

    #[tokio::test]
    async fn test_stream_error_is_transport_failure() {
        let service = OneStream::items(vec![Err(ServiceError::transport("reset"))]);
        let sink = RecordingSink::new(queued());
        let outcome = PushChannel::new(service)
            .run("J1", &sink, CancellationToken::new())
            .await;
        assert_eq!(
            outcome,
            ChannelOutcome::TransportFailed("Transport error: reset".into())
        );
    }

    #[tokio::test]
    async fn test_open_failure_is_transport_failure_even_for_not_found() {
        let service = OneStream::failing(ServiceError::NotFound {
            job_id: "J1".into(),
        });
        let sink = RecordingSink::new(queued());
        let outcome = PushChannel::new(service)
            .run("J1", &sink, CancellationToken::new())
            .await;
        assert!(matches!(outcome, ChannelOutcome::TransportFailed(_)));
    }

    #[tokio::test]
    async fn test_password_pause_stops_channel() {
        let service = OneStream::items(vec![Ok(JobUpdate::new(
            JobStatus::PasswordRequired,
            None,
            Some("Password needed".into()),
        ))]);
        let sink = RecordingSink::new(queued());
        let outcome = PushChannel::new(service)
            .run("J1", &sink, CancellationToken::new())
            .await;
        assert_eq!(outcome, ChannelOutcome::Finished(Delivery::Paused));
    }

    #[tokio::test]
    async fn test_cancelled_before_open() {
        let service = OneStream::items(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = RecordingSink::new(queued());
        let outcome = PushChannel::new(service).run("J1", &sink, cancel).await;
        assert_eq!(outcome, ChannelOutcome::Cancelled);
    }
}
