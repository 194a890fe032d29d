//! Main binary for Meridian Gateway

use meridian_gateway::{
    config::{GatewayConfig, TransactionConfig, UpstreamConfig},
    coordinator::TransactionCoordinator,
    error::GatewayError,
    http::HttpServer,
    registry::ServiceRegistry,
    GATEWAY_NAME, GATEWAY_VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting {} v{}", GATEWAY_NAME, GATEWAY_VERSION);

    // Load configuration
    let config = load_config().await?;
    info!("Configuration loaded successfully");

    // Initialize components
    let registry = Arc::new(ServiceRegistry::new(config.upstream.clone()));
    let coordinator = Arc::new(TransactionCoordinator::new(config.transactions.clone()));

    // Seed statically configured services
    for service in &config.static_services {
        registry
            .register(&service.name, &service.host, service.port)
            .await;
    }

    // Start the transaction retention sweep
    let sweep = coordinator.clone().spawn_retention_sweep();

    // Create HTTP server
    let server = Arc::new(HttpServer::new(
        config.clone(),
        registry.clone(),
        coordinator.clone(),
    ));
    let app = server.create_router();

    // Start HTTP server
    let addr: std::net::SocketAddr = config.gateway_endpoint.parse()?;
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = serve.await {
        tracing::error!("HTTP server error: {}", e);
    }

    sweep.abort();
    info!("Gateway shutdown completed");
    Ok(())
}

/// Load configuration from environment, file, or defaults
async fn load_config() -> Result<GatewayConfig, GatewayError> {
    if let Ok(config) = load_config_from_env() {
        return Ok(config);
    }

    if let Ok(config) = load_config_from_file().await {
        return Ok(config);
    }

    warn!("No configuration found, using defaults");
    Ok(GatewayConfig::default())
}

/// Load configuration from environment variables. `GATEWAY_ENDPOINT` must
/// be present for the environment to count as a configuration source.
fn load_config_from_env() -> Result<GatewayConfig, GatewayError> {
    let gateway_endpoint = std::env::var("GATEWAY_ENDPOINT")
        .map_err(|_| GatewayError::Configuration("GATEWAY_ENDPOINT not set".to_string()))?;

    let gateway_id =
        std::env::var("GATEWAY_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    let defaults = GatewayConfig::default();
    let upstream_defaults = UpstreamConfig::default();
    let transaction_defaults = TransactionConfig::default();

    let upstream = UpstreamConfig {
        request_timeout: env_millis("REQUEST_TIMEOUT_MS", upstream_defaults.request_timeout)?,
        error_threshold: env_parsed("ERROR_THRESHOLD", upstream_defaults.error_threshold)?,
        error_timeout_multiplier: env_parsed(
            "ERROR_TIMEOUT_MULTIPLIER",
            upstream_defaults.error_timeout_multiplier,
        )?,
    };

    let transactions = TransactionConfig {
        participant_timeout: env_millis(
            "PARTICIPANT_TIMEOUT_MS",
            transaction_defaults.participant_timeout,
        )?,
        retention: env_millis("TRANSACTION_RETENTION_MS", transaction_defaults.retention)?,
        sweep_interval: env_millis(
            "TRANSACTION_SWEEP_INTERVAL_MS",
            transaction_defaults.sweep_interval,
        )?,
    };

    Ok(GatewayConfig {
        gateway_id,
        gateway_endpoint,
        upstream,
        transactions,
        proxy_routes: defaults.proxy_routes,
        static_services: defaults.static_services,
    })
}

/// Load configuration from a TOML file
async fn load_config_from_file() -> Result<GatewayConfig, GatewayError> {
    let config_path =
        std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config/gateway.toml".to_string());

    let config_content = tokio::fs::read_to_string(&config_path).await.map_err(|e| {
        GatewayError::Configuration(format!("Failed to read config file: {}", e))
    })?;

    let config: GatewayConfig = toml::from_str(&config_content).map_err(|e| {
        GatewayError::Configuration(format!("Failed to parse config file: {}", e))
    })?;

    Ok(config)
}

fn env_millis(name: &str, default: Duration) -> Result<Duration, GatewayError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| GatewayError::Configuration(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, GatewayError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| GatewayError::Configuration(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, shutting down");
        }
        _ = terminate => {
            info!("SIGTERM received, shutting down");
        }
    }
}
