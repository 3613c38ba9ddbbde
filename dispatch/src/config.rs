use crate::backends::BackendRegistry;
use crate::tools::ToolCategory;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MIB: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Backend URL for {0} must be http or https: {1}")]
    InvalidBackendUrl(ToolCategory, String),

    #[error("Per-file limit ({file}) cannot exceed the per-request limit ({request})")]
    FileLimitAboveRequestLimit { file: u64, request: u64 },

    #[error("Size limits must be greater than 0")]
    ZeroSizeLimit,

    #[error("Rate limit window and request threshold must be greater than 0")]
    InvalidRateLimit,

    #[error("Retry policy needs at least one attempt")]
    NoAttempts,

    #[error("Jitter must be between 0 and 1, got {0}")]
    InvalidJitter(f64),

    #[error("Timeouts must be greater than 0")]
    ZeroTimeout,
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Public listener for tool requests
    #[serde(default = "Listener::public")]
    pub listener: Listener,
    /// Admin listener for health and readiness endpoints
    #[serde(default = "Listener::admin")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub limits: UploadLimits,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener: Listener::public(),
            admin_listener: Listener::admin(),
            backends: BackendsConfig::default(),
            limits: UploadLimits::default(),
            rate_limit: RateLimitConfig::default(),
            health: HealthConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.backends.validate()?;
        self.limits.validate()?;
        self.rate_limit.validate()?;
        self.health.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    fn public() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
        }
    }

    fn admin() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5001,
        }
    }

    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Base URL of the backend serving each category
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendsConfig {
    pub pdf: Url,
    pub image: Url,
    pub media: Url,
    pub government: Url,
    pub developer: Url,
}

impl BackendsConfig {
    pub fn url_for(&self, category: ToolCategory) -> &Url {
        match category {
            ToolCategory::Pdf => &self.pdf,
            ToolCategory::Image => &self.image,
            ToolCategory::Media => &self.media,
            ToolCategory::Government => &self.government,
            ToolCategory::Developer => &self.developer,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        BackendRegistry::try_new(self).map(|_| ())
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        let local = |port: u16| {
            Url::parse(&format!("http://127.0.0.1:{port}")).expect("static URL is valid")
        };
        Self {
            pdf: local(8001),
            image: local(8002),
            media: local(8003),
            government: local(8004),
            developer: local(8005),
        }
    }
}

/// Upload size limits, in bytes
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadLimits {
    pub max_file_bytes: u64,
    pub max_request_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 50 * MIB,
            max_request_bytes: 100 * MIB,
        }
    }
}

impl UploadLimits {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_file_bytes == 0 || self.max_request_bytes == 0 {
            return Err(ValidationError::ZeroSizeLimit);
        }
        if self.max_file_bytes > self.max_request_bytes {
            return Err(ValidationError::FileLimitAboveRequestLimit {
                file: self.max_file_bytes,
                request: self.max_request_bytes,
            });
        }
        Ok(())
    }
}

/// Per-client sliding window admission
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: usize,
    /// Upper bound on the number of clients tracked at once
    pub max_clients: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 900,
            max_requests: 100,
            max_clients: 100_000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.window_secs == 0 || self.max_requests == 0 || self.max_clients == 0 {
            return Err(ValidationError::InvalidRateLimit);
        }
        Ok(())
    }
}

/// Backend health probing
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub timeout_ms: u64,
    /// How long a healthy result is reused across requests. 0 disables caching.
    pub cache_ttl_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            cache_ttl_ms: 0,
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_ms > 0).then(|| Duration::from_millis(self.cache_ttl_ms))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 {
            return Err(ValidationError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Forwarding retry policy
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Extra random delay, as a fraction of the exponential delay
    pub jitter: f64,
    pub attempt_timeout_ms: u64,
    /// Optional bound on the whole forwarding phase, retries included
    pub request_deadline_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1_000,
            jitter: 0.25,
            attempt_timeout_ms: 60_000,
            request_deadline_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::NoAttempts);
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ValidationError::InvalidJitter(self.jitter));
        }
        if self.attempt_timeout_ms == 0 || self.request_deadline_ms == Some(0) {
            return Err(ValidationError::ZeroTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
backends:
    pdf: "http://pdf.internal:8001"
    image: "http://image.internal:8002"
limits:
    max_file_bytes: 1048576
rate_limit:
    window_secs: 60
    max_requests: 10
health:
    cache_ttl_ms: 2000
retry:
    max_attempts: 2
    jitter: 0.0
    request_deadline_ms: 120000
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 3000);
        assert_eq!(config.backends.pdf.as_str(), "http://pdf.internal:8001/");
        // Unspecified backends keep their defaults
        assert_eq!(config.backends.media.as_str(), "http://127.0.0.1:8003/");
        assert_eq!(config.limits.max_file_bytes, MIB);
        assert_eq!(config.limits.max_request_bytes, 100 * MIB);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.rate_limit.max_clients, 100_000);
        assert_eq!(config.health.cache_ttl(), Some(Duration::from_secs(2)));
        assert_eq!(config.health.timeout(), Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.retry.request_deadline(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.window_secs, 900);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.limits.max_file_bytes, 50 * MIB);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.attempt_timeout(), Duration::from_secs(60));
        assert_eq!(config.health.cache_ttl(), None);
    }

    #[test]
    fn test_validation_errors() {
        let base_config = Config::default();

        let mut config = base_config.clone();
        config.listener.port = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidPort
        ));

        let mut config = base_config.clone();
        config.backends.image = Url::parse("ftp://image.internal").unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidBackendUrl(ToolCategory::Image, _)
        ));

        let mut config = base_config.clone();
        config.limits.max_file_bytes = config.limits.max_request_bytes + 1;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::FileLimitAboveRequestLimit { .. }
        ));

        let mut config = base_config.clone();
        config.rate_limit.max_requests = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidRateLimit
        ));

        let mut config = base_config.clone();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::NoAttempts
        ));

        let mut config = base_config.clone();
        config.retry.jitter = 1.5;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidJitter(_)
        ));

        let mut config = base_config;
        config.health.timeout_ms = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::ZeroTimeout
        ));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(serde_yaml::from_str::<Config>("backends: {pdf: \"not-a-url\"}").is_err());

        // Invalid port type
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: "not_a_number"}
"#
            )
            .is_err()
        );

        // Listener needs both fields when present
        assert!(serde_yaml::from_str::<Config>("listener: {host: \"0.0.0.0\"}").is_err());
    }
}
