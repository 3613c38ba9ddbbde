use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Serves `service` on `host:port` until `shutdown` is cancelled.
///
/// Connections already accepted keep running to completion; only the accept
/// loop stops.
pub async fn run_http_service<S, E>(
    host: &str,
    port: u16,
    service: S,
    shutdown: CancellationToken,
) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(host, port, "listening");
    serve_listener(listener, service, shutdown).await
}

/// Same as [`run_http_service`] but on an already bound listener.
pub async fn serve_listener<S, E>(
    listener: TcpListener,
    service: S,
    shutdown: CancellationToken,
) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let service_arc = Arc::new(service);

    loop {
        let (stream, _peer_addr) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        let _ = stream.set_nodelay(true);
        let io = TokioIo::new(stream);
        let svc = service_arc.clone();

        // Hand the connection to hyper; auto-detect h1/h2 on this socket
        tokio::spawn(async move {
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await
            {
                tracing::debug!(error = %e, "connection closed with error");
            }
        });
    }
}

/// Builds a plain-text response carrying the canonical reason of `status_code`.
pub fn make_boxed_error_response<E>(status_code: StatusCode) -> Response<BoxBody<Bytes, E>>
where
    E: 'static,
{
    let message = status_code
        .canonical_reason()
        .unwrap_or("an error occurred");

    let mut response = Response::new(
        Full::new(Bytes::from(format!("{message}\n")))
            .map_err(|e| match e {})
            .boxed(),
    );
    *response.status_mut() = status_code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::future::Future;
    use std::pin::Pin;

    #[derive(thiserror::Error, Debug)]
    enum TestError {
        #[error("io: {0}")]
        Io(#[from] std::io::Error),
    }

    struct Teapot;

    impl Service<Request<Incoming>> for Teapot {
        type Response = Response<BoxBody<Bytes, TestError>>;
        type Error = TestError;
        type Future =
            Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

        fn call(&self, _req: Request<Incoming>) -> Self::Future {
            Box::pin(async { Ok(make_boxed_error_response(StatusCode::IM_A_TEAPOT)) })
        }
    }

    #[test]
    fn test_error_response_uses_canonical_reason() {
        let response = make_boxed_error_response::<Infallible>(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_serve_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(serve_listener(listener, Teapot, shutdown.clone()));

        let response = raw_get(port).await;
        assert!(response.starts_with("HTTP/1.1 418"));

        shutdown.cancel();
        let result = server.await.unwrap();
        assert!(result.is_ok());
    }

    // Minimal HTTP/1.1 request over a raw socket, returning the raw response text.
    async fn raw_get(port: u16) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }
}
