use crate::forwarder::ForwardError;
use crate::health::UnhealthyReason;
use crate::tools::ToolCategory;
use crate::upload::ValidationError;
use http::StatusCode;
use thiserror::Error;

/// Result type alias for dispatch operations
pub type Result<T, E = DispatchError> = std::result::Result<T, E>;

/// Every way a tool request can fail, in the order the pipeline can produce them
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("rate limit exceeded, try again later")]
    RateLimited,

    #[error("{0}")]
    InvalidUpload(#[from] ValidationError),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("{category} service is unavailable ({reason})")]
    BackendUnavailable {
        category: ToolCategory,
        reason: UnhealthyReason,
    },

    #[error("{0}")]
    Forward(#[from] ForwardError),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::InvalidUpload(e) => e.status(),
            DispatchError::UnknownTool(_) => StatusCode::NOT_FOUND,
            DispatchError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Forward(e) => e.status(),
        }
    }
}
