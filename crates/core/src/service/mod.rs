// crates/core/src/service/mod.rs
//! Client side of the remote job service.

pub mod http;
pub mod sse;

pub use http::HttpJobService;

use async_trait::async_trait;
use docjobs_types::{JobUpdate, SubmitResponse};
use futures_util::stream::BoxStream;

use crate::document::Document;
use crate::error::ServiceError;

/// Push updates for one job. An `Err` item or the end of the stream means
/// the transport is gone.
pub type UpdateStream = BoxStream<'static, Result<JobUpdate, ServiceError>>;

/// Trait for the backend that processes documents.
///
/// Implementations include:
/// - `HttpJobService`: REST + server-sent events over reqwest
/// - scripted fakes in tests
#[async_trait]
pub trait JobService: Send + Sync {
    /// `POST /jobs`. A password demand is an `Ok` response, not an error,
    /// however the server chose to express it.
    async fn submit(
        &self,
        document: &Document,
        password: Option<&str>,
    ) -> Result<SubmitResponse, ServiceError>;

    /// `GET /jobs/{jobId}`. Unknown jobs are `ServiceError::NotFound`.
    async fn fetch_status(&self, job_id: &str) -> Result<JobUpdate, ServiceError>;

    /// `GET /jobs/{jobId}/stream`.
    async fn open_stream(&self, job_id: &str) -> Result<UpdateStream, ServiceError>;
}
