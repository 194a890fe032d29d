//! HTTP surface for Meridian Gateway

use crate::{
    config::GatewayConfig,
    coordinator::TransactionCoordinator,
    error::GatewayError,
    proxy::{error_body, json_response, ProxyClient},
    registry::ServiceRegistry,
    DEFAULT_MAX_REQUEST_SIZE,
};
use axum::{
    body::{to_bytes, Body},
    extract::{Path, State},
    http::{Request, Response, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router as AxumRouter,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// HTTP server for the gateway: service-discovery management, proxying,
/// and transaction coordination endpoints
pub struct HttpServer {
    config: GatewayConfig,
    registry: Arc<ServiceRegistry>,
    coordinator: Arc<TransactionCoordinator>,
    proxy: ProxyClient,
    started_at: Instant,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct DeregisterRequest {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartTransactionRequest {
    participants: Option<Vec<String>>,
}

impl HttpServer {
    /// Create new HTTP server
    pub fn new(
        config: GatewayConfig,
        registry: Arc<ServiceRegistry>,
        coordinator: Arc<TransactionCoordinator>,
    ) -> Self {
        Self {
            config,
            registry,
            coordinator,
            proxy: ProxyClient::new(),
            started_at: Instant::now(),
        }
    }

    /// Create router with all endpoints. Anything that matches no explicit
    /// route falls through to the proxy.
    pub fn create_router(self: Arc<Self>) -> AxumRouter {
        AxumRouter::new()
            // Service discovery endpoints
            .route("/api/service-discovery/register", post(Self::register_service))
            .route("/api/service-discovery/deregister", post(Self::deregister_service))
            .route("/api/service-discovery/services", get(Self::list_services))
            .route("/api/service-discovery/service/{name}", get(Self::get_service))
            .route("/api/service-discovery/health", get(Self::health))
            // Transaction coordinator endpoints
            .route("/api/transactions/start", post(Self::start_transaction))
            .route("/api/transactions/{id}/prepare", post(Self::prepare_transaction))
            .route("/api/transactions/{id}/commit", post(Self::commit_transaction))
            .route("/api/transactions/{id}/abort", post(Self::abort_transaction))
            .route("/api/transactions/{id}", get(Self::transaction_status))
            // Proxy all other requests
            .fallback(Self::proxy_request)
            .with_state(self)
            .layer(middleware::from_fn(Self::logging_middleware))
    }

    /// Register a service instance
    async fn register_service(
        State(server): State<Arc<Self>>,
        Json(request): Json<RegisterRequest>,
    ) -> impl IntoResponse {
        let (Some(name), Some(host), Some(port)) = (request.name, request.host, request.port)
        else {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": "Missing required fields"})),
            );
        };

        server.registry.register(&name, &host, port).await;
        (
            StatusCode::CREATED,
            Json(json!({
                "message": "Service registered successfully",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
    }

    /// Deregister a service and all of its instances
    async fn deregister_service(
        State(server): State<Arc<Self>>,
        Json(request): Json<DeregisterRequest>,
    ) -> impl IntoResponse {
        let Some(name) = request.name else {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": "Missing service name"})),
            );
        };

        if server.registry.deregister(&name).await {
            (
                StatusCode::OK,
                Json(json!({"message": "Service deregistered successfully"})),
            )
        } else {
            (
                StatusCode::NOT_FOUND,
                Json(json!({"message": "Service not found"})),
            )
        }
    }

    /// Snapshot of every registered service
    async fn list_services(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let services = server.registry.get_all_services().await;
        Json(json!({
            "totalServices": services.len(),
            "gatewayUptime": server.started_at.elapsed().as_secs(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "services": services,
        }))
    }

    /// Snapshot of a single service
    async fn get_service(
        State(server): State<Arc<Self>>,
        Path(name): Path<String>,
    ) -> Response<Body> {
        match server.registry.get_service(&name).await {
            Some(snapshot) => Json(snapshot).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({"message": "Service not found"})),
            )
                .into_response(),
        }
    }

    /// Aggregate gateway health
    async fn health(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let report = server.registry.get_health().await;
        Json(json!({
            "status": report.status,
            "timestamp": report.timestamp.to_rfc3339(),
            "gatewayUptime": server.started_at.elapsed().as_secs(),
            "services": report.services,
        }))
    }

    /// Start a new transaction
    async fn start_transaction(
        State(server): State<Arc<Self>>,
        Json(request): Json<StartTransactionRequest>,
    ) -> impl IntoResponse {
        let participants = request.participants.unwrap_or_default();
        if participants.len() < 2 {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": "At least 2 participants are required"})),
            );
        }

        let record = server.coordinator.create_transaction(participants).await;
        (
            StatusCode::CREATED,
            Json(json!({
                "transactionId": record.transaction_id,
                "status": record.status,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
    }

    /// Run the prepare phase
    async fn prepare_transaction(
        State(server): State<Arc<Self>>,
        Path(id): Path<String>,
    ) -> Response<Body> {
        match server.coordinator.prepare_phase(&id).await {
            Ok(record) => json_response(
                StatusCode::OK,
                json!({
                    "transactionId": record.transaction_id,
                    "status": record.status,
                    "votes": record.votes,
                }),
            ),
            Err(err) => server.error_response(&err),
        }
    }

    /// Run the commit phase
    async fn commit_transaction(
        State(server): State<Arc<Self>>,
        Path(id): Path<String>,
    ) -> Response<Body> {
        match server.coordinator.commit_phase(&id).await {
            Ok(record) => json_response(
                StatusCode::OK,
                json!({
                    "transactionId": record.transaction_id,
                    "status": record.status,
                    "commitResults": record.commit_results,
                }),
            ),
            Err(err) => server.error_response(&err),
        }
    }

    /// Abort the transaction
    async fn abort_transaction(
        State(server): State<Arc<Self>>,
        Path(id): Path<String>,
    ) -> Response<Body> {
        match server.coordinator.abort_transaction(&id).await {
            Ok(record) => json_response(
                StatusCode::OK,
                json!({
                    "transactionId": record.transaction_id,
                    "status": record.status,
                    "abortResults": record.abort_results,
                }),
            ),
            Err(err) => server.error_response(&err),
        }
    }

    /// Full transaction record
    async fn transaction_status(
        State(server): State<Arc<Self>>,
        Path(id): Path<String>,
    ) -> Response<Body> {
        match server.coordinator.get_status(&id).await {
            Ok(record) => Json(record).into_response(),
            Err(err) => server.error_response(&err),
        }
    }

    /// Proxy a request to the service owning the matched path prefix
    async fn proxy_request(
        State(server): State<Arc<Self>>,
        request: Request<Body>,
    ) -> Response<Body> {
        let path = request.uri().path().to_string();
        let route = server
            .config
            .proxy_routes
            .iter()
            .filter(|route| {
                path == route.prefix
                    || (path.starts_with(&route.prefix)
                        && path[route.prefix.len()..].starts_with('/'))
            })
            .max_by_key(|route| route.prefix.len());

        let Some(route) = route else {
            return error_body(StatusCode::NOT_FOUND, "Route not found", "NOT_FOUND");
        };

        let mut downstream_path = path[route.prefix.len()..].to_string();
        if downstream_path.is_empty() {
            downstream_path.push('/');
        }
        if let Some(query) = request.uri().query() {
            downstream_path.push('?');
            downstream_path.push_str(query);
        }

        let method = request.method().clone();
        let headers = request.headers().clone();
        let body = match to_bytes(request.into_body(), DEFAULT_MAX_REQUEST_SIZE).await {
            Ok(bytes) => bytes,
            Err(err) => {
                return error_body(
                    StatusCode::BAD_REQUEST,
                    &format!("Failed to read request body: {}", err),
                    "BAD_REQUEST",
                );
            }
        };

        let proxy = server.proxy.clone();
        let result = server
            .registry
            .handle_request(&route.service, |instance| async move {
                proxy
                    .forward(&instance, method, &downstream_path, &headers, body)
                    .await
            })
            .await;

        match result {
            Ok(response) => response,
            Err(err) => {
                error!("Proxy error for {}: {}", route.service, err);
                server.error_response(&err)
            }
        }
    }

    /// Map an internal failure to its external response
    fn error_response(&self, err: &GatewayError) -> Response<Body> {
        match err {
            GatewayError::CircuitOpen(state) => {
                let retry_after = self.config.upstream.error_timeout().as_secs_f64().ceil() as u64;
                json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "message": "Service temporarily unavailable",
                        "status": format!("Circuit breaker is {}", state),
                        "retryAfter": retry_after,
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    }),
                )
            }
            GatewayError::NoHealthyInstance(_) => error_body(
                StatusCode::SERVICE_UNAVAILABLE,
                "No healthy instances available",
                "SERVICE_UNAVAILABLE",
            ),
            GatewayError::RequestTimeout(_) => {
                error_body(StatusCode::GATEWAY_TIMEOUT, "Service request timed out", "TIMEOUT")
            }
            GatewayError::Downstream { status, body } => {
                let status = StatusCode::from_u16(*status)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let content_type = if serde_json::from_str::<serde_json::Value>(body).is_ok() {
                    "application/json"
                } else {
                    "text/plain"
                };
                Response::builder()
                    .status(status)
                    .header("content-type", content_type)
                    .body(Body::from(body.clone()))
                    .unwrap_or_else(|_| {
                        error_body(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Internal server error",
                            "INTERNAL_ERROR",
                        )
                    })
            }
            GatewayError::TransactionNotFound(id) => error_body(
                StatusCode::NOT_FOUND,
                &format!("Transaction not found: {}", id),
                "NOT_FOUND",
            ),
            GatewayError::InvalidTransactionState(message) => {
                error_body(StatusCode::CONFLICT, message, "INVALID_STATE")
            }
            GatewayError::MissingField(field) => error_body(
                StatusCode::BAD_REQUEST,
                &format!("Missing required field: {}", field),
                "BAD_REQUEST",
            ),
            _ => error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                "INTERNAL_ERROR",
            ),
        }
    }

    /// Request logging middleware
    async fn logging_middleware(
        request: Request<Body>,
        next: middleware::Next,
    ) -> Response<Body> {
        let start = Instant::now();
        let method = request.method().clone();
        let uri = request.uri().clone();

        let response = next.run(request).await;

        let latency = start.elapsed();
        info!(
            "{} {} {} {}ms",
            method,
            uri,
            response.status(),
            latency.as_millis()
        );

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use std::time::Duration;

    async fn spawn_gateway(config: GatewayConfig) -> String {
        let registry = Arc::new(ServiceRegistry::new(config.upstream.clone()));
        let coordinator = Arc::new(TransactionCoordinator::new(config.transactions.clone()));
        let server = Arc::new(HttpServer::new(config, registry, coordinator));
        let app = server.create_router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Backend echoing its path and method as JSON
    async fn spawn_backend() -> (String, u16) {
        let app = AxumRouter::new().fallback(|request: Request<Body>| async move {
            Json(json!({
                "path": request.uri().path(),
                "method": request.method().as_str(),
            }))
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr.ip().to_string(), addr.port())
    }

    /// Participant that always votes commit and commits cleanly
    async fn spawn_participant() -> String {
        let app = AxumRouter::new()
            .route("/prepare", post(|| async { Json(json!({"vote": "COMMIT"})) }))
            .route("/commit", post(|| async { Json(json!({"applied": true})) }))
            .route("/abort", post(|| async { Json(json!({"rolledBack": true})) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_register_list_and_deregister_roundtrip() {
        let base = spawn_gateway(GatewayConfig::default()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/api/service-discovery/register", base))
            .json(&json!({"name": "movie-service", "host": "localhost", "port": 9001}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);

        let missing = client
            .post(format!("{}/api/service-discovery/register", base))
            .json(&json!({"name": "movie-service"}))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 400);

        let services: serde_json::Value = client
            .get(format!("{}/api/service-discovery/services", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(services["totalServices"], 1);
        assert_eq!(
            services["services"]["movie-service"]["healthyInstances"],
            1
        );

        let single = client
            .get(format!("{}/api/service-discovery/service/movie-service", base))
            .send()
            .await
            .unwrap();
        assert_eq!(single.status(), 200);
        let unknown = client
            .get(format!("{}/api/service-discovery/service/ghost", base))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 404);

        let deregistered = client
            .post(format!("{}/api/service-discovery/deregister", base))
            .json(&json!({"name": "movie-service"}))
            .send()
            .await
            .unwrap();
        assert_eq!(deregistered.status(), 200);
        let again = client
            .post(format!("{}/api/service-discovery/deregister", base))
            .json(&json!({"name": "movie-service"}))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), 404);
    }

    #[tokio::test]
    async fn test_health_endpoint_reports_up() {
        let base = spawn_gateway(GatewayConfig::default()).await;
        let client = reqwest::Client::new();

        client
            .post(format!("{}/api/service-discovery/register", base))
            .json(&json!({"name": "auth-service", "host": "localhost", "port": 9101}))
            .send()
            .await
            .unwrap();

        let health: serde_json::Value = client
            .get(format!("{}/api/service-discovery/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "UP");
        assert_eq!(health["services"][0]["name"], "auth-service");
        assert_eq!(health["services"][0]["circuitBreakerStatus"], "CLOSED");
    }

    #[tokio::test]
    async fn test_proxy_forwards_and_strips_route_prefix() {
        let base = spawn_gateway(GatewayConfig::default()).await;
        let (backend_host, backend_port) = spawn_backend().await;
        let client = reqwest::Client::new();

        client
            .post(format!("{}/api/service-discovery/register", base))
            .json(&json!({"name": "movie-service", "host": backend_host, "port": backend_port}))
            .send()
            .await
            .unwrap();

        let response = client
            .get(format!("{}/api/movies/popular", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["path"], "/popular");
        assert_eq!(body["method"], "GET");
    }

    #[tokio::test]
    async fn test_proxy_unmatched_route_is_404() {
        let base = spawn_gateway(GatewayConfig::default()).await;
        let response = reqwest::get(format!("{}/api/unknown/thing", base))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_proxy_maps_open_breaker_to_503_with_retry_after() {
        let mut config = GatewayConfig::default();
        config.upstream = UpstreamConfig {
            request_timeout: Duration::from_millis(500),
            error_threshold: 1,
            error_timeout_multiplier: 3.5,
        };
        let base = spawn_gateway(config).await;
        let client = reqwest::Client::new();

        // Nothing listens on this port; the first call fails and opens the
        // breaker at threshold 1.
        client
            .post(format!("{}/api/service-discovery/register", base))
            .json(&json!({"name": "movie-service", "host": "127.0.0.1", "port": 1}))
            .send()
            .await
            .unwrap();

        let first = client
            .get(format!("{}/api/movies/popular", base))
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), 500);

        let second = client
            .get(format!("{}/api/movies/popular", base))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), 503);
        let body: serde_json::Value = second.json().await.unwrap();
        assert_eq!(body["retryAfter"], 2);
        assert!(body["status"].as_str().unwrap().contains("OPEN"));
    }

    #[tokio::test]
    async fn test_transaction_endpoints_full_flow() {
        let base = spawn_gateway(GatewayConfig::default()).await;
        let client = reqwest::Client::new();
        let participants = vec![spawn_participant().await, spawn_participant().await];

        let too_few = client
            .post(format!("{}/api/transactions/start", base))
            .json(&json!({"participants": [participants[0]]}))
            .send()
            .await
            .unwrap();
        assert_eq!(too_few.status(), 400);

        let started: serde_json::Value = client
            .post(format!("{}/api/transactions/start", base))
            .json(&json!({"participants": participants}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(started["status"], "PENDING");
        let id = started["transactionId"].as_str().unwrap().to_string();

        let prepared: serde_json::Value = client
            .post(format!("{}/api/transactions/{}/prepare", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(prepared["status"], "READY_TO_COMMIT");
        assert_eq!(prepared["votes"].as_array().unwrap().len(), 2);

        let committed: serde_json::Value = client
            .post(format!("{}/api/transactions/{}/commit", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(committed["status"], "COMMITTED");

        let record: serde_json::Value = client
            .get(format!("{}/api/transactions/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(record["status"], "COMMITTED");
        assert!(record["log"].as_array().unwrap().len() >= 4);

        let missing = client
            .get(format!("{}/api/transactions/no-such-id", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }
}
