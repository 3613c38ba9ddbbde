use crate::GatewayError;
use crate::dispatcher::Dispatcher;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use indexmap::IndexMap;
use serde::Serialize;
use shared::http::make_boxed_error_response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type AdminResponse = Response<BoxBody<Bytes, GatewayError>>;

/// Liveness, readiness and backend health endpoints
pub struct AdminService {
    dispatcher: Arc<Dispatcher>,
}

impl AdminService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[derive(Serialize)]
struct BackendsReport {
    status: &'static str,
    backends: IndexMap<&'static str, &'static str>,
}

impl Service<Request<Incoming>> for AdminService {
    type Response = AdminResponse;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();

        Box::pin(async move {
            if req.method() != Method::GET {
                return Ok(make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED));
            }

            let res = match req.uri().path() {
                "/health" | "/ready" => text_response("ok\n"),
                "/health/backends" => backends_response(&dispatcher).await,
                _ => make_boxed_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}

async fn backends_response(dispatcher: &Dispatcher) -> AdminResponse {
    let backends = dispatcher
        .health()
        .report()
        .await
        .into_iter()
        .map(|(category, health)| (category.as_str(), health.label()))
        .collect();

    let report = BackendsReport {
        status: "ok",
        backends,
    };

    match serde_json::to_vec(&report) {
        Ok(body) => {
            let mut response = Response::new(full(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!("Failed to serialize backend health report: {}", e);
            make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn text_response(body: &'static str) -> AdminResponse {
    Response::new(full(body))
}

fn full(body: impl Into<Bytes>) -> BoxBody<Bytes, GatewayError> {
    Full::new(body.into()).map_err(|e| match e {}).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendsConfig, Config};
    use shared::http::serve_listener;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn spawn_admin(config: &Config) -> (u16, CancellationToken) {
        let shutdown = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new(config, shutdown.clone()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(serve_listener::<_, GatewayError>(
            listener,
            AdminService::new(dispatcher),
            shutdown.clone(),
        ));
        (port, shutdown)
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let (port, shutdown) = spawn_admin(&Config::default()).await;

        let health = get(port, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("ok\n"));

        let ready = get(port, "/ready").await;
        assert!(ready.starts_with("HTTP/1.1 200"));

        let missing = get(port, "/metrics").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_backend_report() {
        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&healthy)
            .await;
        let failing = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing)
            .await;
        let down = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let healthy_url = Url::parse(&healthy.uri()).unwrap();
        let config = Config {
            backends: BackendsConfig {
                pdf: healthy_url.clone(),
                image: Url::parse(&failing.uri()).unwrap(),
                media: Url::parse(&format!("http://127.0.0.1:{down}")).unwrap(),
                government: healthy_url.clone(),
                developer: healthy_url,
            },
            ..Config::default()
        };
        let (port, shutdown) = spawn_admin(&config).await;

        let response = get(port, "/health/backends").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let report: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            report,
            serde_json::json!({
                "status": "ok",
                "backends": {
                    "pdf": "healthy",
                    "image": "unhealthy",
                    "media": "down",
                    "government": "healthy",
                    "developer": "healthy",
                }
            })
        );

        shutdown.cancel();
    }
}
