//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (request ID, tracing, body limit)
//! - Bind server to listener with graceful shutdown
//! - Dispatch requests through the upstream registry
//! - Short-circuit unhealthy upstreams, forward the rest

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::health::{HealthBoard, Verdict};
use crate::http::request::{request_id, upstream_request};
use crate::http::response::{exceeded_body_limit, relay, ProxyError};
use crate::observability::metrics;
use crate::routing::{decide, RequestTarget, UpstreamRegistry};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<UpstreamRegistry>,
    pub health: HealthBoard,
    pub client: Client<HttpConnector, Body>,
    pub request_timeout: Duration,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server over a compiled registry and health board.
    pub fn new(config: &ProxyConfig, registry: Arc<UpstreamRegistry>, health: HealthBoard) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            registry,
            health,
            client,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        };

        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes));

        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(middleware)
    }

    /// The router, for driving the proxy without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Resolves the upstream, checks its verdict once, and forwards or rejects.
/// The request timeout bounds the whole round trip, response body included.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let deadline = time::Instant::now() + state.request_timeout;
    let request_id = request_id(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let decision = match decide(
        &state.registry,
        &state.health,
        &RequestTarget::from_request(&request),
    ) {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(request_id = %request_id, method = %method, path = %path, error = %e, "No route matched");
            let error = ProxyError::from(e);
            metrics::record_request("none", Verdict::Unknown, error.status().as_u16(), start_time);
            return error.into_response();
        }
    };

    let upstream = decision.service.name.clone();
    let verdict = decision.verdict;

    if !decision.eligible {
        let error = ProxyError::Unhealthy(upstream.clone());
        tracing::warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            upstream = %upstream,
            verdict = %verdict,
            status = error.status().as_u16(),
            "Upstream unhealthy, request rejected"
        );
        metrics::record_request(&upstream, verdict, error.status().as_u16(), start_time);
        return error.into_response();
    }

    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let result = match upstream_request(request, &decision.service.authority, client_addr) {
        Ok(outbound) => match time::timeout_at(deadline, state.client.request(outbound)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if exceeded_body_limit(&e) => Err(ProxyError::PayloadTooLarge),
            Ok(Err(e)) => Err(ProxyError::Upstream {
                upstream: upstream.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ProxyError::Timeout(upstream.clone())),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => {
            let status = response.status();
            tracing::info!(
                request_id = %request_id,
                method = %method,
                path = %path,
                upstream = %upstream,
                verdict = %verdict,
                status = status.as_u16(),
                latency_ms = start_time.elapsed().as_millis() as u64,
                "Request forwarded"
            );
            metrics::record_request(&upstream, verdict, status.as_u16(), start_time);
            relay(response, upstream, deadline).into_response()
        }
        Err(error) => {
            tracing::error!(
                request_id = %request_id,
                method = %method,
                path = %path,
                upstream = %upstream,
                verdict = %verdict,
                status = error.status().as_u16(),
                error = %error,
                "Upstream request failed"
            );
            metrics::record_request(&upstream, verdict, error.status().as_u16(), start_time);
            error.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RoutePredicateConfig, UpstreamConfig};
    use crate::health::{HealthWriter, ProbeOutcome, Thresholds};
    use axum::body::{to_bytes, Bytes};
    use axum::http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    fn upstream(name: &str, address: &str, prefix: &str) -> UpstreamConfig {
        UpstreamConfig {
            name: name.into(),
            address: address.into(),
            routes: vec![RoutePredicateConfig {
                path_prefix: Some(prefix.into()),
                host: None,
            }],
            health_check: Default::default(),
            process: None,
        }
    }

    /// Accepts connections and reads requests but never answers.
    async fn silent_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                    time::sleep(Duration::from_secs(30)).await;
                });
            }
        });
        addr.to_string()
    }

    /// Sends headers promising 100 bytes, writes a few, then stalls.
    async fn stalling_body_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                        .await;
                    time::sleep(Duration::from_secs(30)).await;
                });
            }
        });
        addr.to_string()
    }

    fn server_with(mut config: ProxyConfig, upstreams: Vec<UpstreamConfig>) -> Router {
        config.upstreams = upstreams;
        let registry = Arc::new(UpstreamRegistry::from_config(&config.upstreams).unwrap());
        let (board, _writers) = HealthBoard::new(config.upstreams.iter().map(|u| u.name.clone()));
        HttpServer::new(&config, registry, board).router()
    }

    async fn dead_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn server(upstreams: Vec<UpstreamConfig>) -> (Router, Vec<HealthWriter>) {
        let mut config = ProxyConfig::default();
        config.timeouts.connect_secs = 1;
        config.upstreams = upstreams;
        let registry = Arc::new(UpstreamRegistry::from_config(&config.upstreams).unwrap());
        let (board, writers) = HealthBoard::new(config.upstreams.iter().map(|u| u.name.clone()));
        (HttpServer::new(&config, registry, board).router(), writers)
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_unmatched_path_is_not_found() {
        let addr = dead_address().await;
        let (router, _writers) = server(vec![upstream("excel-api", &addr, "/api")]);
        let response = router.oneshot(get("/unknown-path")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_unhealthy_upstream_short_circuits() {
        let addr = dead_address().await;
        let (router, writers) = server(vec![upstream("excel-api", &addr, "/api")]);
        let thresholds = Thresholds { failure: 3, recovery: 1 };
        for _ in 0..3 {
            writers[0].record(ProbeOutcome::Failure, thresholds);
        }
        let response = router.oneshot(get("/api/process")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_connection_failure_is_bad_gateway() {
        let addr = dead_address().await;
        let (router, _writers) = server(vec![upstream("excel-api", &addr, "/")]);
        let response = router.oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let addr = dead_address().await;
        let mut config = ProxyConfig::default();
        config.listener.max_body_bytes = 16;
        config.upstreams = vec![upstream("excel-api", &addr, "/")];
        let registry = Arc::new(UpstreamRegistry::from_config(&config.upstreams).unwrap());
        let (board, _writers) = HealthBoard::new(["excel-api"]);
        let router = HttpServer::new(&config, registry, board).router();

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-length", "64")
            .body(Body::from(vec![0u8; 64]))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_chunked_oversized_body_rejected() {
        let addr = silent_backend().await;
        let mut config = ProxyConfig::default();
        config.listener.max_body_bytes = 16;
        let router = server_with(config, vec![upstream("excel-api", &addr, "/")]);

        let chunks = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 32])),
            Ok(Bytes::from(vec![0u8; 32])),
        ]);
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from_stream(chunks))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_slow_upstream_is_gateway_timeout() {
        let addr = silent_backend().await;
        let mut config = ProxyConfig::default();
        config.timeouts.request_secs = 1;
        let router = server_with(config, vec![upstream("excel-api", &addr, "/")]);

        let started = Instant::now();
        let response = router.oneshot(get("/api/process")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_stalled_response_body_is_cut_off() {
        let addr = stalling_body_backend().await;
        let mut config = ProxyConfig::default();
        config.timeouts.request_secs = 1;
        let router = server_with(config, vec![upstream("excel-api", &addr, "/")]);

        let response = router.oneshot(get("/export.csv")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = time::timeout(Duration::from_secs(3), to_bytes(response.into_body(), usize::MAX)).await;
        assert!(matches!(body, Ok(Err(_))), "body should end with an error once the deadline passes");
    }
}
