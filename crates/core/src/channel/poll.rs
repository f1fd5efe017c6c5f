// crates/core/src/channel/poll.rs
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Backoff, ChannelKind, ChannelOutcome, Delivery, UpdateChannel, UpdateSink};
use crate::config::PollConfig;
use crate::error::ServiceError;
use crate::service::JobService;

/// Periodic status queries, used once the push stream is gone.
pub struct PollChannel {
    service: Arc<dyn JobService>,
    policy: PollConfig,
}

impl PollChannel {
    pub fn new(service: Arc<dyn JobService>, policy: PollConfig) -> Self {
        Self { service, policy }
    }
}

#[async_trait]
impl UpdateChannel for PollChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Poll
    }

    async fn run(
        &self,
        job_id: &str,
        sink: &dyn UpdateSink,
        cancel: CancellationToken,
    ) -> ChannelOutcome {
        let max_attempts = self.policy.max_attempts;
        let mut delays = Backoff::new(&self.policy);

        for attempt in 1..=max_attempts {
            let delay = delays.next().unwrap_or_else(|| self.policy.max_delay());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ChannelOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ChannelOutcome::Cancelled,
                fetched = self.service.fetch_status(job_id) => fetched,
            };
            match fetched {
                Ok(update) => match sink.deliver(update) {
                    Delivery::Continue => {}
                    done => return ChannelOutcome::Finished(done),
                },
                Err(ServiceError::NotFound { .. }) => {
                    tracing::info!(job_id, attempt, "job unknown to the server");
                    return ChannelOutcome::NotFound;
                }
                Err(e) => {
                    tracing::warn!(job_id, attempt, max_attempts, error = %e, "status poll failed");
                }
            }
        }

        tracing::warn!(job_id, attempts = max_attempts, "polling stopped without a final status");
        ChannelOutcome::Exhausted {
            attempts: max_attempts,
        }
    }
}
