mod config;
mod telemetry;

use clap::{Args, Parser};
use config::{Config, ConfigError};
use dispatch::GatewayError;
use std::path::{Path, PathBuf};
use std::process;
use telemetry::TelemetryError;
use tokio_util::sync::CancellationToken;

/// Gateway that dispatches tool requests to backend processing services
#[derive(Parser)]
#[command(name = "toolgate", version)]
enum CliCommand {
    /// Run the public and admin listeners
    Serve(ConfigArgs),
    /// Load and validate a config file, then exit
    CheckConfig(ConfigArgs),
    /// Print which tools route to which backend category
    Tools,
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] dispatch::config::ValidationError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

fn main() {
    let cli = CliCommand::parse();

    let result = match &cli {
        CliCommand::Serve(args) => serve(&args.config),
        CliCommand::CheckConfig(args) => check_config(&args.config),
        CliCommand::Tools => {
            print!("{}", dispatch::tools::describe_routing_table());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("toolgate: {e}");
        process::exit(1);
    }
}

fn load(path: &Path) -> Result<Config, CliError> {
    let config = Config::from_file(path)?;
    config.gateway.validate()?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<(), CliError> {
    load(path)?;
    println!("{}: ok", path.display());
    Ok(())
}

fn serve(path: &Path) -> Result<(), CliError> {
    let config = load(path)?;

    let _sentry = telemetry::init_logging(&config.common.logging)?;
    telemetry::init_metrics(config.common.metrics.as_ref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let shutdown = CancellationToken::new();

        let signal = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("shutdown requested");
            signal.cancel();
        });

        tracing::info!(config = %path.display(), "starting toolgate");
        dispatch::run(config.gateway, shutdown).await
    })?;

    tracing::info!("toolgate stopped");
    Ok(())
}
