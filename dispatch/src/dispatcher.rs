use crate::backends::BackendRegistry;
use crate::config::{Config, ValidationError as ConfigError};
use crate::errors::{DispatchError, Result};
use crate::forwarder::{ForwardOutcome, Forwarder};
use crate::health::{Health, HealthGate};
use crate::metrics_defs::{
    RATE_LIMITED, REQUEST_DURATION, REQUESTS_INFLIGHT, UNKNOWN_TOOL, UPLOAD_REJECTED,
};
use crate::rate_limit::RateLimiter;
use crate::response::{DispatchResult, normalize};
use crate::tools::classify;
use crate::upload::{UploadValidator, UploadedFile, ValidatedUpload};
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runs a tool request through every stage of the pipeline:
/// rate limit, upload validation, classification, health check, forward, normalize.
pub struct Dispatcher {
    rate_limiter: RateLimiter,
    validator: UploadValidator,
    health: HealthGate,
    forwarder: Forwarder,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// `shutdown` is observed by every in-flight forward.
    pub fn new(config: &Config, shutdown: CancellationToken) -> std::result::Result<Self, ConfigError> {
        let registry = Arc::new(BackendRegistry::try_new(&config.backends)?);
        let client = reqwest::Client::new();

        Ok(Dispatcher {
            rate_limiter: RateLimiter::new(&config.rate_limit),
            validator: UploadValidator::new(config.limits.clone()),
            health: HealthGate::new(client.clone(), registry.clone(), &config.health),
            forwarder: Forwarder::new(client, registry, config.retry.clone()),
            shutdown,
        })
    }

    pub fn validator(&self) -> &UploadValidator {
        &self.validator
    }

    pub fn health(&self) -> &HealthGate {
        &self.health
    }

    /// Rejects clients that are already over quota, without charging them.
    pub fn check_quota(&self, client_id: &str) -> Result<()> {
        if self.rate_limiter.would_admit(client_id) {
            Ok(())
        } else {
            Err(DispatchError::RateLimited)
        }
    }

    /// Handles a request whose files are already in memory.
    #[cfg(test)]
    pub async fn handle(
        &self,
        client_id: &str,
        tool_name: &str,
        files: Vec<UploadedFile>,
        metadata: Option<String>,
    ) -> DispatchResult {
        if let Err(error) = self.check_quota(client_id) {
            return self.reject(client_id, tool_name, error);
        }

        match self.validator.validate(files, metadata) {
            Ok(upload) => self.dispatch(client_id, tool_name, &upload).await,
            Err(error) => self.reject(client_id, tool_name, error.into()),
        }
    }

    /// Handles a request whose upload already passed validation.
    pub async fn dispatch(
        &self,
        client_id: &str,
        tool_name: &str,
        upload: &ValidatedUpload,
    ) -> DispatchResult {
        let started = Instant::now();
        let _inflight = InflightGuard::new();

        let result = match self.route(client_id, tool_name, upload).await {
            Ok(outcome) => normalize(&outcome),
            Err(error) => self.reject(client_id, tool_name, error),
        };

        if let DispatchResult::Failure { status, message } = &result
            && status.is_server_error()
        {
            tracing::warn!(client_id, tool = tool_name, status = status.as_u16(), %message, "tool request failed");
        }
        histogram!(REQUEST_DURATION, "status" => result.status().as_str().to_string())
            .record(started.elapsed().as_secs_f64());

        result
    }

    /// Turns a failure from any stage before forwarding into the client-facing result.
    pub fn reject(&self, client_id: &str, tool_name: &str, error: DispatchError) -> DispatchResult {
        match &error {
            DispatchError::RateLimited => {
                tracing::debug!(client_id, tool = tool_name, "rate limited");
                counter!(RATE_LIMITED).increment(1);
            }
            DispatchError::InvalidUpload(e) => {
                tracing::info!(client_id, tool = tool_name, reason = e.reason(), "upload rejected: {}", e);
                counter!(UPLOAD_REJECTED, "reason" => e.reason()).increment(1);
            }
            DispatchError::UnknownTool(_) => {
                tracing::info!(client_id, tool = tool_name, "unknown tool");
                counter!(UNKNOWN_TOOL).increment(1);
            }
            DispatchError::BackendUnavailable { category, reason } => {
                tracing::warn!(client_id, tool = tool_name, %category, %reason, "backend unavailable");
            }
            DispatchError::Forward(_) => {}
        }

        DispatchResult::from(&error)
    }

    async fn route(
        &self,
        client_id: &str,
        tool_name: &str,
        upload: &ValidatedUpload,
    ) -> Result<ForwardOutcome> {
        if !self.rate_limiter.admit(client_id) {
            return Err(DispatchError::RateLimited);
        }

        let category =
            classify(tool_name).ok_or_else(|| DispatchError::UnknownTool(tool_name.to_string()))?;

        if let Health::Unhealthy(reason) = self.health.check(category).await {
            return Err(DispatchError::BackendUnavailable { category, reason });
        }

        tracing::debug!(
            client_id,
            tool = tool_name,
            %category,
            files = upload.files().len(),
            "forwarding tool request"
        );
        Ok(self
            .forwarder
            .forward(category, tool_name, upload, &self.shutdown)
            .await)
    }
}

// Keeps the in-flight gauge right when a request future is dropped mid-way.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}
