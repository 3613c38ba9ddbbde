//! Retrying forwarder
//!
//! Sends a validated upload to `<backend>/process/<tool>` as multipart form data and
//! classifies every attempt as a success, a retryable failure (429, 5xx, timeout,
//! network error) or a terminal failure. Retryable failures are retried with jittered
//! exponential backoff until the attempt budget runs out; the last failure is reported.
//!
//! Every send and every backoff sleep races the cancellation token, and the whole loop
//! can be bounded by an overall deadline.

use crate::backends::BackendRegistry;
use crate::config::RetryConfig;
use crate::metrics_defs::{FORWARD_ATTEMPT_DURATION, FORWARD_ATTEMPTS};
use crate::tools::ToolCategory;
use crate::upload::ValidatedUpload;
use http::StatusCode;
use rand::Rng;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForwardError {
    /// The backend refused the request; its status is passed through
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("backend busy, try again later")]
    Busy,

    #[error("upstream error: backend returned {0}")]
    Upstream(StatusCode),

    #[error("upstream error: backend timed out")]
    Timeout,

    #[error("upstream error: could not reach backend")]
    Network,

    #[error("upstream error: backend returned a malformed response")]
    MalformedResponse,

    #[error("upstream error: unexpected backend status {0}")]
    UnexpectedStatus(StatusCode),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request cancelled, service is shutting down")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Rejected { status, .. } => *status,
            ForwardError::Busy => StatusCode::TOO_MANY_REQUESTS,
            ForwardError::Upstream(_)
            | ForwardError::Network
            | ForwardError::MalformedResponse
            | ForwardError::UnexpectedStatus(_) => StatusCode::BAD_GATEWAY,
            ForwardError::Timeout | ForwardError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ForwardError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Backend payload on success, or the failure that ended the attempt loop
pub type ForwardOutcome = Result<Value, ForwardError>;

/// How a single attempt ended
#[derive(Debug, PartialEq)]
enum AttemptOutcome {
    Success(Value),
    Retryable(ForwardError),
    Terminal(ForwardError),
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(_) => "success",
            AttemptOutcome::Retryable(_) => "retryable",
            AttemptOutcome::Terminal(_) => "terminal",
        }
    }
}

/// Delay before retry number `retry` (0-based): `base * 2^retry`, stretched by up to
/// `jitter` of itself. `sample` is a uniform draw from `[0, 1]`.
pub fn backoff_delay(base: Duration, retry: u32, jitter: f64, sample: f64) -> Duration {
    let factor = 2_u32.checked_pow(retry).unwrap_or(u32::MAX);
    let delay = base.saturating_mul(factor);
    let stretch = 1.0 + jitter * sample.clamp(0.0, 1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * stretch).unwrap_or(Duration::MAX)
}

pub struct Forwarder {
    client: reqwest::Client,
    registry: Arc<BackendRegistry>,
    policy: RetryConfig,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, registry: Arc<BackendRegistry>, policy: RetryConfig) -> Self {
        Forwarder {
            client,
            registry,
            policy,
        }
    }

    pub async fn forward(
        &self,
        category: ToolCategory,
        tool_name: &str,
        upload: &ValidatedUpload,
        cancel: &CancellationToken,
    ) -> ForwardOutcome {
        let attempts = self.run_attempts(category, tool_name, upload, cancel);

        match self.policy.request_deadline() {
            Some(deadline) => tokio::time::timeout(deadline, attempts)
                .await
                .unwrap_or(Err(ForwardError::DeadlineExceeded)),
            None => attempts.await,
        }
    }

    async fn run_attempts(
        &self,
        category: ToolCategory,
        tool_name: &str,
        upload: &ValidatedUpload,
        cancel: &CancellationToken,
    ) -> ForwardOutcome {
        let url = self.registry.get(category).process_url(tool_name);
        let base_delay = Duration::from_millis(self.policy.base_delay_ms);
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ForwardError::Cancelled),
                outcome = self.send_once(url.clone(), upload) => outcome,
            };
            let elapsed = started.elapsed();

            tracing::debug!(
                %category,
                tool = tool_name,
                attempt,
                outcome = outcome.label(),
                elapsed_ms = elapsed.as_millis() as u64,
                "forward attempt finished"
            );
            counter!(
                FORWARD_ATTEMPTS,
                "category" => category.as_str(),
                "outcome" => outcome.label()
            )
            .increment(1);
            histogram!(FORWARD_ATTEMPT_DURATION, "category" => category.as_str())
                .record(elapsed.as_secs_f64());

            let error = match outcome {
                AttemptOutcome::Success(payload) => return Ok(payload),
                AttemptOutcome::Terminal(error) => return Err(error),
                AttemptOutcome::Retryable(error) => error,
            };

            if attempt + 1 >= self.policy.max_attempts {
                tracing::warn!(
                    %category,
                    tool = tool_name,
                    attempts = attempt + 1,
                    %error,
                    "giving up on backend"
                );
                return Err(error);
            }

            let sample: f64 = rand::thread_rng().r#gen();
            let delay = backoff_delay(base_delay, attempt, self.policy.jitter, sample);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ForwardError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn send_once(&self, url: Url, upload: &ValidatedUpload) -> AttemptOutcome {
        let form = match build_form(upload) {
            Ok(form) => form,
            Err(e) => return AttemptOutcome::Terminal(e),
        };

        let result = self
            .client
            .post(url)
            .multipart(form)
            .timeout(self.policy.attempt_timeout())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => return transport_failure(e),
        };

        let status = response.status();
        match response.bytes().await {
            Ok(body) => classify_response(status, &body),
            Err(e) => transport_failure(e),
        }
    }
}

fn transport_failure(error: reqwest::Error) -> AttemptOutcome {
    if error.is_timeout() {
        return AttemptOutcome::Retryable(ForwardError::Timeout);
    }
    tracing::debug!(error = %error, "backend request failed");
    AttemptOutcome::Retryable(ForwardError::Network)
}

fn build_form(upload: &ValidatedUpload) -> Result<Form, ForwardError> {
    let mut form = Form::new();

    for file in upload.files() {
        let mut part =
            Part::stream_with_length(file.data.clone(), file.size()).file_name(file.name.clone());
        if let Some(content_type) = &file.content_type {
            part = part.mime_str(content_type).map_err(|_| {
                ForwardError::InvalidRequest(format!(
                    "invalid content type {content_type:?} for file {}",
                    file.name
                ))
            })?;
        }
        form = form.part("files", part);
    }

    if let Some(metadata) = upload.metadata() {
        form = form.text("metadata", metadata.to_string());
    }

    Ok(form)
}

fn classify_response(status: StatusCode, body: &[u8]) -> AttemptOutcome {
    if status == StatusCode::OK {
        return match serde_json::from_slice(body) {
            Ok(payload) => AttemptOutcome::Success(payload),
            Err(_) => AttemptOutcome::Terminal(ForwardError::MalformedResponse),
        };
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return AttemptOutcome::Retryable(ForwardError::Busy);
    }

    if status.is_server_error() {
        return AttemptOutcome::Retryable(ForwardError::Upstream(status));
    }

    // 400, 413, 415 and 422 are the expected refusals; any other 4xx is passed through the same way
    if status.is_client_error() {
        let message = error_detail(body)
            .unwrap_or_else(|| format!("backend rejected the request ({status})"));
        return AttemptOutcome::Terminal(ForwardError::Rejected { status, message });
    }

    AttemptOutcome::Terminal(ForwardError::UnexpectedStatus(status))
}

/// Extracts `detail` from a JSON error body. Never fails.
fn error_detail(body: &[u8]) -> Option<String> {
    let Ok(Value::Object(mut object)) = serde_json::from_slice::<Value>(body) else {
        return None;
    };

    match object.remove("detail")? {
        Value::String(detail) => Some(detail),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
