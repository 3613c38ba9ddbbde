use crate::GatewayError;
use crate::config::{Listener, UploadLimits};
use crate::dispatcher::Dispatcher;
use crate::response::DispatchResult;
use crate::upload::{
    UploadValidator, UploadedFile, ValidatedUpload, ValidationError, check_name_present,
    check_received_file,
};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Multipart, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::BytesMut;
use http::request::Parts;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Room for multipart boundaries and part headers on top of the payload limit
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

const METADATA_FIELD: &str = "metadata";

/// Identifies the caller for rate limiting: the first `X-Forwarded-For` entry, else the
/// peer address, else `"unknown"`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientId(pub String);

impl<S> FromRequestParts<S> for ClientId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        if let Some(forwarded) = forwarded {
            return Ok(ClientId(forwarded.to_string()));
        }

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(ClientId(addr.ip().to_string()));
        }

        Ok(ClientId("unknown".to_string()))
    }
}

pub fn router(dispatcher: Arc<Dispatcher>, limits: &UploadLimits) -> Router {
    let body_limit = limits
        .max_request_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/", get(banner))
        .route("/tools/{tool_name}", post(tool_handler))
        .route("/api/tools/{tool_name}", post(tool_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(dispatcher)
}

/// Serves the public listener until `shutdown` is cancelled.
pub async fn serve(
    listener: &Listener,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<(), GatewayError> {
    let app = router(dispatcher.clone(), dispatcher.validator().limits());

    let addr = format!("{}:{}", listener.host, listener.port);
    let tcp = TcpListener::bind(addr).await?;
    tracing::info!(host = %listener.host, port = listener.port, "public listener started");

    axum::serve(tcp, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn banner() -> Json<Value> {
    Json(json!({
        "message": "toolgate API gateway",
        "status": "active",
    }))
}

async fn tool_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    Path(tool_name): Path<String>,
    ClientId(client_id): ClientId,
    multipart: Result<Multipart, MultipartRejection>,
) -> DispatchResult {
    // Over-quota clients are turned away before their body is read
    if let Err(error) = dispatcher.check_quota(&client_id) {
        return dispatcher.reject(&client_id, &tool_name, error);
    }

    let upload = match multipart {
        Ok(multipart) => read_upload(dispatcher.validator(), multipart).await,
        Err(rejection) => Err(ValidationError::MalformedBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }),
    };

    match upload {
        Ok(upload) => dispatcher.dispatch(&client_id, &tool_name, &upload).await,
        Err(error) => dispatcher.reject(&client_id, &tool_name, error.into()),
    }
}

/// Reads the multipart body chunk by chunk, enforcing size limits as bytes arrive so an
/// oversized upload is rejected without being buffered in full.
///
/// File parts are those carrying a filename, or named `files`/`file`. A part named
/// `metadata` without a filename is the metadata text. Anything else is skipped.
async fn read_upload(
    validator: &UploadValidator,
    mut multipart: Multipart,
) -> Result<ValidatedUpload, ValidationError> {
    let mut budget = validator.budget();
    let mut files = Vec::new();
    let mut metadata = None;

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        let field_name = field.name().unwrap_or_default().to_string();

        let file_name = match field.file_name().map(str::to_string) {
            Some(file_name) => file_name,
            None if field_name == METADATA_FIELD => {
                metadata = Some(field.text().await.map_err(malformed)?);
                continue;
            }
            None if matches!(field_name.as_str(), "files" | "file") => String::new(),
            None => continue,
        };

        check_name_present(&file_name)?;
        budget.start_file();

        let content_type = field.content_type().map(str::to_string);
        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(malformed)? {
            budget.charge(&file_name, chunk.len() as u64)?;
            data.extend_from_slice(&chunk);
        }

        let file = UploadedFile {
            name: file_name,
            content_type,
            data: data.freeze(),
        };
        check_received_file(&file)?;
        files.push(file);
    }

    validator.accept(files, metadata)
}

fn malformed(error: MultipartError) -> ValidationError {
    ValidationError::MalformedBody {
        status: error.status(),
        message: error.body_text(),
    }
}
