use dispatch::config::Config as GatewayConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    #[serde(default = "default_statsd_port")]
    pub statsd_port: u16,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_statsd_port() -> u16 {
    8125
}

fn default_prefix() -> String {
    "toolgate".into()
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            sentry_dsn: None,
            sentry_environment: None,
        }
    }
}

#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(flatten)]
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
