pub mod admin;
pub mod api;
pub mod backends;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod forwarder;
pub mod health;
pub mod metrics_defs;
pub mod rate_limit;
pub mod response;
pub mod tools;
pub mod upload;

use admin::AdminService;
use dispatcher::Dispatcher;
use shared::http::run_http_service;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ValidationError),
}

/// Runs the public and admin listeners until `shutdown` is cancelled.
pub async fn run(config: config::Config, shutdown: CancellationToken) -> Result<(), GatewayError> {
    config.validate()?;

    let dispatcher = Arc::new(Dispatcher::new(&config, shutdown.clone())?);

    let public_task = api::serve(&config.listener, dispatcher.clone(), shutdown.clone());
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(dispatcher),
        shutdown.clone(),
    );

    // Either listener failing takes the other down with it
    if let Err(e) = tokio::try_join!(public_task, admin_task) {
        shutdown.cancel();
        return Err(e);
    }
    Ok(())
}
