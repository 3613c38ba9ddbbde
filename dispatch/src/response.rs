//! Response normalization
//!
//! Collapses a forward outcome, or a failure from any earlier step, into the single
//! shape clients see: the backend payload untouched, or a status with a `detail`.

use crate::errors::DispatchError;
use crate::forwarder::ForwardOutcome;
use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchResult {
    Success { payload: Value },
    Failure { status: StatusCode, message: String },
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchResult::Success { .. })
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DispatchResult::Success { .. } => StatusCode::OK,
            DispatchResult::Failure { status, .. } => *status,
        }
    }
}

/// Maps a forward outcome to the client contract. Pure, so normalizing the same
/// outcome twice gives equal results.
pub fn normalize(outcome: &ForwardOutcome) -> DispatchResult {
    match outcome {
        Ok(payload) => DispatchResult::Success {
            payload: payload.clone(),
        },
        Err(error) => DispatchResult::Failure {
            status: error.status(),
            message: error.to_string(),
        },
    }
}

impl From<&DispatchError> for DispatchResult {
    fn from(error: &DispatchError) -> Self {
        DispatchResult::Failure {
            status: error.status(),
            message: error.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

impl IntoResponse for DispatchResult {
    fn into_response(self) -> Response {
        match self {
            DispatchResult::Success { payload } => (StatusCode::OK, Json(payload)).into_response(),
            DispatchResult::Failure { status, message } => {
                (status, Json(ErrorBody { detail: &message })).into_response()
            }
        }
    }
}
