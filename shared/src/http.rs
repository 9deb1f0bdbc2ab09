use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Binds `host:port` and serves `service` on it until `shutdown` resolves.
pub async fn run_http_service<S, E, F>(
    host: &str,
    port: u16,
    service: S,
    shutdown: F,
    grace_period: Duration,
) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(host, port, "listening");
    serve(listener, service, shutdown, grace_period).await
}

/// Serves each accepted connection on its own task until `shutdown` resolves. Connections
/// in flight at that point get up to `grace_period` to finish before they are dropped.
pub async fn serve<S, E, F>(
    listener: TcpListener,
    service: S,
    shutdown: F,
    grace_period: Duration,
) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
    F: Future<Output = ()>,
{
    let service_arc = Arc::new(service);
    let builder = Builder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, no longer accepting connections");
                break;
            }
        };
        let _ = stream.set_nodelay(true);
        let io = TokioIo::new(stream);
        let svc = service_arc.clone();

        // Hand the connection to hyper; auto-detect h1/h2 on this socket
        let conn = graceful.watch(builder.serve_connection(io, svc).into_owned());
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(%peer_addr, error = %e, "connection closed with error");
            }
        });
    }

    drop(listener);
    tokio::select! {
        _ = graceful.shutdown() => tracing::info!("all connections closed"),
        _ = tokio::time::sleep(grace_period) => {
            tracing::warn!(?grace_period, "grace period elapsed, dropping open connections");
        }
    }

    Ok(())
}

/// Wraps a complete payload in a boxed body.
pub fn full_body<E>(bytes: impl Into<Bytes>) -> BoxBody<Bytes, E> {
    Full::new(bytes.into()).map_err(|e| match e {}).boxed()
}

/// Builds a response with a JSON-encoded body and the given status.
///
/// Serialization of plain data structs does not fail in practice; if it does, the
/// response degrades to a 500 with an empty JSON object.
pub fn make_json_response<T, E>(status: StatusCode, value: &T) -> Response<BoxBody<Bytes, E>>
where
    T: Serialize + ?Sized,
{
    let (status, bytes) = match serde_json::to_vec(value) {
        Ok(bytes) => (status, Bytes::from(bytes)),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response body");
            (StatusCode::INTERNAL_SERVER_ERROR, Bytes::from_static(b"{}"))
        }
    };

    let mut response = Response::new(full_body(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// A response with no body, e.g. for CORS preflight.
pub fn make_empty_response<E>(status: StatusCode) -> Response<BoxBody<Bytes, E>> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::pin::Pin;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::{Notify, oneshot};

    type TestBody = BoxBody<Bytes, std::io::Error>;

    /// Signals when a request arrives, then answers after `delay`.
    struct SlowService {
        started: Arc<Notify>,
        delay: Option<Duration>,
    }

    impl Service<Request<Incoming>> for SlowService {
        type Response = Response<TestBody>;
        type Error = std::io::Error;
        type Future =
            Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

        fn call(&self, _req: Request<Incoming>) -> Self::Future {
            let started = self.started.clone();
            let delay = self.delay;
            Box::pin(async move {
                started.notify_one();
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
                Ok(make_json_response(StatusCode::OK, &serde_json::json!({"done": true})))
            })
        }
    }

    async fn start_slow_server(
        delay: Option<Duration>,
        grace_period: Duration,
    ) -> (
        std::net::SocketAddr,
        Arc<Notify>,
        oneshot::Sender<()>,
        tokio::task::JoinHandle<Result<(), std::io::Error>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let started = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let service = SlowService {
            started: started.clone(),
            delay,
        };

        let server = tokio::spawn(serve(
            listener,
            service,
            async move {
                let _ = shutdown_rx.await;
            },
            grace_period,
        ));

        (addr, started, shutdown_tx, server)
    }

    async fn send_request(addr: std::net::SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        stream
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_request() {
        let (addr, started, shutdown_tx, server) =
            start_slow_server(Some(Duration::from_millis(300)), Duration::from_secs(10)).await;

        let mut stream = send_request(addr).await;
        started.notified().await;
        shutdown_tx.send(()).unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with(r#"{"done":true}"#), "{response}");

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server stops after draining")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_grace_period_is_bounded() {
        let (addr, started, shutdown_tx, server) =
            start_slow_server(None, Duration::from_millis(100)).await;

        let _stream = send_request(addr).await;
        started.notified().await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server stops once the grace period elapses")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_without_connections() {
        let (_, _, shutdown_tx, server) =
            start_slow_server(None, Duration::from_secs(10)).await;

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server stops immediately")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_make_json_response() {
        let response: Response<BoxBody<Bytes, Infallible>> =
            make_json_response(StatusCode::CREATED, &serde_json::json!({"status": "ok"}));

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_make_empty_response() {
        let response: Response<BoxBody<Bytes, Infallible>> =
            make_empty_response(StatusCode::NO_CONTENT);

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }
}
