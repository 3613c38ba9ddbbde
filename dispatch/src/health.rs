//! Health gate
//!
//! Probes a backend's `/health` endpoint right before a request is forwarded to it.
//! Results are not shared between requests unless a cache TTL is configured, in which
//! case healthy results are reused for that long. Unhealthy results are never cached so
//! a backend that recovers is picked up by the next request.

use crate::backends::{BackendRegistry, BackendTarget};
use crate::config::HealthConfig;
use crate::metrics_defs::{BACKEND_UNHEALTHY, HEALTH_CACHE_HIT};
use crate::tools::ToolCategory;
use indexmap::IndexMap;
use moka::sync::Cache;
use reqwest::StatusCode;
use shared::counter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnhealthyReason {
    Timeout,
    Unreachable,
    BadStatus(u16),
}

impl fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnhealthyReason::Timeout => f.write_str("timeout"),
            UnhealthyReason::Unreachable => f.write_str("unreachable"),
            UnhealthyReason::BadStatus(code) => write!(f, "bad-status:{code}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy(UnhealthyReason),
}

impl Health {
    /// Label used by the aggregate health report
    pub fn label(&self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Unhealthy(UnhealthyReason::BadStatus(_)) => "unhealthy",
            Health::Unhealthy(_) => "down",
        }
    }
}

pub struct HealthGate {
    client: reqwest::Client,
    registry: Arc<BackendRegistry>,
    timeout: Duration,
    cache: Option<Cache<ToolCategory, ()>>,
}

impl HealthGate {
    pub fn new(client: reqwest::Client, registry: Arc<BackendRegistry>, config: &HealthConfig) -> Self {
        let cache = config.cache_ttl().map(|ttl| {
            Cache::builder()
                .max_capacity(ToolCategory::ALL.len() as u64)
                .time_to_live(ttl)
                .build()
        });

        HealthGate {
            client,
            registry,
            timeout: config.timeout(),
            cache,
        }
    }

    /// Checks the backend serving `category`.
    pub async fn check(&self, category: ToolCategory) -> Health {
        if let Some(cache) = &self.cache
            && cache.contains_key(&category)
        {
            counter!(HEALTH_CACHE_HIT).increment(1);
            return Health::Healthy;
        }

        let health = probe(&self.client, self.registry.get(category), self.timeout).await;

        match health {
            Health::Healthy => {
                if let Some(cache) = &self.cache {
                    cache.insert(category, ());
                }
            }
            Health::Unhealthy(reason) => {
                tracing::warn!(%category, %reason, "backend failed health check");
                counter!(
                    BACKEND_UNHEALTHY,
                    "category" => category.as_str(),
                    "reason" => reason.to_string()
                )
                .increment(1);
            }
        }

        health
    }

    /// Probes every backend concurrently, bypassing the cache.
    pub async fn report(&self) -> IndexMap<ToolCategory, Health> {
        let mut join_set = JoinSet::new();

        for target in self.registry.iter() {
            let client = self.client.clone();
            let target = target.clone();
            let timeout = self.timeout;
            join_set.spawn(async move { (target.category, probe(&client, &target, timeout).await) });
        }

        let mut results = IndexMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((category, health)) => {
                    results.insert(category, health);
                }
                Err(e) => tracing::error!("Health probe task panicked: {}", e),
            }
        }

        // Report in routing table order regardless of completion order
        results.sort_by(|a, _, b, _| a.index().cmp(&b.index()));
        results
    }
}

async fn probe(client: &reqwest::Client, target: &BackendTarget, timeout: Duration) -> Health {
    let response = client
        .get(target.health_url())
        .timeout(timeout)
        .send()
        .await;

    match response {
        Ok(response) if response.status() == StatusCode::OK => Health::Healthy,
        Ok(response) => Health::Unhealthy(UnhealthyReason::BadStatus(response.status().as_u16())),
        Err(e) if e.is_timeout() => Health::Unhealthy(UnhealthyReason::Timeout),
        Err(e) => {
            tracing::debug!(category = %target.category, error = %e, "health probe failed");
            Health::Unhealthy(UnhealthyReason::Unreachable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendsConfig;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry_for(uri: &str) -> Arc<BackendRegistry> {
        let url = Url::parse(uri).unwrap();
        let config = BackendsConfig {
            pdf: url.clone(),
            image: url.clone(),
            media: url.clone(),
            government: url.clone(),
            developer: url,
        };
        Arc::new(BackendRegistry::try_new(&config).unwrap())
    }

    fn gate(uri: &str, timeout_ms: u64, cache_ttl_ms: u64) -> HealthGate {
        HealthGate::new(
            reqwest::Client::new(),
            registry_for(uri),
            &HealthConfig {
                timeout_ms,
                cache_ttl_ms,
            },
        )
    }

    #[tokio::test]
    async fn test_healthy_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let gate = gate(&server.uri(), 1_000, 0);
        assert_eq!(gate.check(ToolCategory::Image).await, Health::Healthy);
    }

    #[tokio::test]
    async fn test_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let health = gate(&server.uri(), 1_000, 0).check(ToolCategory::Pdf).await;
        assert_eq!(health, Health::Unhealthy(UnhealthyReason::BadStatus(503)));
        assert_eq!(UnhealthyReason::BadStatus(503).to_string(), "bad-status:503");
        assert_eq!(health.label(), "unhealthy");
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let health = gate(&server.uri(), 50, 0).check(ToolCategory::Image).await;
        assert_eq!(health, Health::Unhealthy(UnhealthyReason::Timeout));
        assert_eq!(health.label(), "down");
    }

    #[tokio::test]
    async fn test_unreachable() {
        // Bind then drop a listener to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let health = gate(&format!("http://127.0.0.1:{port}"), 1_000, 0)
            .check(ToolCategory::Media)
            .await;
        assert_eq!(health, Health::Unhealthy(UnhealthyReason::Unreachable));
        assert_eq!(UnhealthyReason::Unreachable.to_string(), "unreachable");
    }

    #[tokio::test]
    async fn test_checks_are_not_cached_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let gate = gate(&server.uri(), 1_000, 0);
        assert_eq!(gate.check(ToolCategory::Pdf).await, Health::Healthy);
        assert_eq!(gate.check(ToolCategory::Pdf).await, Health::Healthy);
    }

    #[tokio::test]
    async fn test_healthy_results_are_cached_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gate = gate(&server.uri(), 1_000, 60_000);
        assert_eq!(gate.check(ToolCategory::Pdf).await, Health::Healthy);
        assert_eq!(gate.check(ToolCategory::Pdf).await, Health::Healthy);
    }

    #[tokio::test]
    async fn test_unhealthy_results_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let gate = gate(&server.uri(), 1_000, 60_000);
        assert!(matches!(gate.check(ToolCategory::Pdf).await, Health::Unhealthy(_)));
        assert!(matches!(gate.check(ToolCategory::Pdf).await, Health::Unhealthy(_)));
    }

    #[tokio::test]
    async fn test_report_covers_every_backend_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let report = gate(&server.uri(), 1_000, 0).report().await;
        let categories: Vec<_> = report.keys().copied().collect();
        assert_eq!(categories, ToolCategory::ALL.to_vec());
        assert!(report.values().all(|h| *h == Health::Healthy));
    }
}
