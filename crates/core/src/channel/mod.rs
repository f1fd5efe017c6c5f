// crates/core/src/channel/mod.rs
//! Update channels: how progress for a queued job reaches the tracker.
//!
//! Two strategies share one contract:
//! - `PushChannel`: server-sent event stream, the primary path
//! - `PollChannel`: status queries on an exponential backoff, used only
//!   after the push channel failed at the transport level
//!
//! A channel never writes the job record itself. It hands each update to an
//! [`UpdateSink`] and stops when the sink reports that tracking is over.

pub mod backoff;
pub mod poll;
pub mod push;

pub use backoff::Backoff;
pub use poll::PollChannel;
pub use push::PushChannel;

use std::fmt;

use async_trait::async_trait;
use docjobs_types::JobUpdate;
use tokio_util::sync::CancellationToken;

/// Which strategy currently owns a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Push,
    Poll,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Poll => "poll",
        })
    }
}

/// What the sink wants the channel to do after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The job is still active; keep listening.
    Continue,
    /// The job is terminal (now or already).
    Terminal,
    /// The job needs a password; nothing more will arrive until resubmission.
    Paused,
    /// The record was removed locally.
    Gone,
}

/// Receives updates on behalf of one job record.
pub trait UpdateSink: Send + Sync {
    fn deliver(&self, update: JobUpdate) -> Delivery;
}

/// Why a channel stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// The sink reported the given state.
    Finished(Delivery),
    /// Connection-level failure. The only trigger for the polling fallback.
    TransportFailed(String),
    /// The server does not know the job.
    NotFound,
    /// Poll attempt ceiling reached; the job is left as is.
    Exhausted { attempts: u32 },
    Cancelled,
}

/// A strategy for following one job until it stops being active.
#[async_trait]
pub trait UpdateChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Follow `job_id`, delivering into `sink`, until the job finishes, the
    /// channel fails, or `cancel` fires.
    async fn run(
        &self,
        job_id: &str,
        sink: &dyn UpdateSink,
        cancel: CancellationToken,
    ) -> ChannelOutcome;
}
