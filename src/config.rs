//! Configuration for Meridian Gateway

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the Meridian Gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway identifier
    pub gateway_id: String,

    /// Gateway endpoint for external traffic
    pub gateway_endpoint: String,

    /// Upstream call and circuit breaker settings
    pub upstream: UpstreamConfig,

    /// Transaction coordinator settings
    pub transactions: TransactionConfig,

    /// Prefix-to-service proxy routes
    pub proxy_routes: Vec<ProxyRoute>,

    /// Services registered at startup
    pub static_services: Vec<StaticService>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_id: uuid::Uuid::new_v4().to_string(),
            gateway_endpoint: "0.0.0.0:8080".to_string(),
            upstream: UpstreamConfig::default(),
            transactions: TransactionConfig::default(),
            proxy_routes: vec![
                ProxyRoute {
                    prefix: "/api/auth".to_string(),
                    service: "auth-service".to_string(),
                },
                ProxyRoute {
                    prefix: "/api/movies".to_string(),
                    service: "movie-service".to_string(),
                },
            ],
            static_services: Vec::new(),
        }
    }
}

/// Upstream call and circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Budget for a single downstream call
    pub request_timeout: Duration,

    /// Consecutive failures before the breaker opens
    pub error_threshold: u32,

    /// Open-state cooldown as a multiple of the request timeout
    pub error_timeout_multiplier: f64,
}

impl UpstreamConfig {
    /// Cooldown an open breaker waits before permitting a probe
    pub fn error_timeout(&self) -> Duration {
        self.request_timeout.mul_f64(self.error_timeout_multiplier)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(5000),
            error_threshold: 3,
            error_timeout_multiplier: 3.5,
        }
    }
}

/// Transaction coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Budget for a single participant call
    pub participant_timeout: Duration,

    /// How long settled transactions are kept for querying
    pub retention: Duration,

    /// How often the retention sweep runs
    pub sweep_interval: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            participant_timeout: Duration::from_millis(5000),
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// One proxied path prefix and the service it forwards to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRoute {
    /// Path prefix matched against inbound requests
    pub prefix: String,

    /// Target service name in the registry
    pub service: String,
}

/// A service instance registered at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticService {
    /// Service name
    pub name: String,

    /// Instance host
    pub host: String,

    /// Instance port
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_error_timeout() {
        let config = UpstreamConfig::default();
        assert_eq!(config.error_timeout(), Duration::from_millis(17_500));
    }

    #[test]
    fn test_default_proxy_routes() {
        let config = GatewayConfig::default();
        assert_eq!(config.proxy_routes.len(), 2);
        assert_eq!(config.proxy_routes[0].service, "auth-service");
        assert_eq!(config.proxy_routes[1].prefix, "/api/movies");
    }
}
