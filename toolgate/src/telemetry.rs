use crate::config::{LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use sentry::types::Dsn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid sentry DSN: {0}")]
    InvalidDsn(#[from] sentry::types::ParseDsnError),
    #[error("could not build statsd exporter: {0}")]
    Statsd(String),
    #[error("could not install metrics recorder: {0}")]
    Recorder(String),
}

/// Installs the global tracing subscriber and, when a DSN is configured, Sentry.
///
/// The returned guard flushes pending Sentry events when dropped and must be held
/// for the lifetime of the process.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<Option<sentry::ClientInitGuard>, TelemetryError> {
    let guard = match &config.sentry_dsn {
        Some(dsn) => {
            let dsn: Dsn = dsn.parse()?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                environment: config.sentry_environment.clone().map(Into::into),
                ..Default::default()
            }))
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(sentry_layer)
        .init();

    Ok(guard)
}

/// Installs the StatsD recorder when metrics are configured. Without it every metric
/// is a no-op.
pub fn init_metrics(config: Option<&MetricsConfig>) -> Result<(), TelemetryError> {
    let Some(config) = config else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(config.prefix.as_str()))
        .map_err(|e| TelemetryError::Statsd(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| TelemetryError::Recorder(e.to_string()))?;
    shared::metrics_defs::describe_all(dispatch::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
