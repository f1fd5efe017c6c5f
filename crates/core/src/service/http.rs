// crates/core/src/service/http.rs
//! HTTP client for the job service.

use async_trait::async_trait;
use docjobs_types::{
    ErrorBody, JobSnapshot, JobUpdate, StreamUpdate, SubmitResponse, JOB_UPDATE_EVENT,
};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode, Url};

use super::sse::{SseDecoder, SseEvent};
use super::{JobService, UpdateStream};
use crate::config::TrackerConfig;
use crate::document::Document;
use crate::error::ServiceError;

/// Job service reached over REST, with progress pushed as server-sent events.
pub struct HttpJobService {
    client: Client,
    /// No overall timeout: the push stream is long-lived.
    stream_client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpJobService {
    pub fn new(config: &TrackerConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let stream_client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;
        let base_url = Url::parse(&config.api_url).map_err(|e| ServiceError::InvalidUrl {
            url: config.api_url.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            client,
            stream_client,
            base_url,
            token: config.api_token.clone(),
        })
    }

    /// Base URL plus one escaped path segment each.
    fn url(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::InvalidUrl {
                url: self.base_url.to_string(),
                message: "cannot be a base".into(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Bearer credential as a header; the stream endpoint accepts nothing else.
    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn submit(
        &self,
        document: &Document,
        password: Option<&str>,
    ) -> Result<SubmitResponse, ServiceError> {
        let part = Part::bytes(document.bytes.to_vec())
            .file_name(document.filename.clone())
            .mime_str(&document.content_type)?;
        let mut form = Form::new().part("file", part);
        if let Some(password) = password {
            form = form.text("password", password.to_string());
        }

        let response = self
            .authorize(self.client.post(self.url(&["jobs"])?).multipart(form))
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            let value = if body.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&body).map_err(|e| ServiceError::Decode(e.to_string()))?
            };
            return Ok(SubmitResponse::from_body(value));
        }

        let error: ErrorBody = serde_json::from_slice(&body).unwrap_or_default();
        if error.is_password_required() {
            return Ok(SubmitResponse::PasswordRequired {
                message: error.reason().map(str::to_string),
            });
        }
        Err(server_error(status, &error))
    }

    async fn fetch_status(&self, job_id: &str) -> Result<JobUpdate, ServiceError> {
        let response = self
            .authorize(self.client.get(self.url(&["jobs", job_id])?))
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound {
                job_id: job_id.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let error: ErrorBody = serde_json::from_slice(&body).unwrap_or_default();
            return Err(server_error(status, &error));
        }
        let snapshot: JobSnapshot = response.json().await?;
        Ok(snapshot.into())
    }

    async fn open_stream(&self, job_id: &str) -> Result<UpdateStream, ServiceError> {
        let response = self
            .authorize(
                self.stream_client
                    .get(self.url(&["jobs", job_id, "stream"])?)
                    .header(ACCEPT, "text/event-stream")
                    .header(CACHE_CONTROL, "no-cache"),
            )
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound {
                job_id: job_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ServiceError::Server {
                status: status.as_u16(),
                message: format!("stream rejected with {status}"),
            });
        }

        let job_id = job_id.to_string();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut chunks = response.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => match decoder.feed(&chunk) {
                        Ok(events) => {
                            for event in events {
                                if let Some(update) = decode_event(&job_id, event) {
                                    yield Ok(update);
                                }
                            }
                        }
                        Err(e) => {
                            yield Err(ServiceError::transport(e.to_string()));
                            break;
                        }
                    },
                    Err(e) => {
                        yield Err(ServiceError::transport(e.to_string()));
                        break;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

fn server_error(status: StatusCode, body: &ErrorBody) -> ServiceError {
    let message = body
        .reason()
        .map(str::to_string)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "Request failed".to_string());
    ServiceError::Server {
        status: status.as_u16(),
        message,
    }
}

/// Turn a raw event into an update. Foreign event types and undecodable
/// payloads are dropped; they say nothing about the transport.
fn decode_event(job_id: &str, event: SseEvent) -> Option<JobUpdate> {
    if event.event != JOB_UPDATE_EVENT && event.event != "message" {
        return None;
    }
    match serde_json::from_str::<StreamUpdate>(&event.data) {
        Ok(update) => Some(update.into()),
        Err(e) => {
            tracing::debug!(job_id, error = %e, "ignoring undecodable stream event");
            None
        }
    }
}
