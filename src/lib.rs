//! Meridian Gateway
//!
//! API gateway fronting a set of backend services: a health-aware,
//! circuit-breaking round-robin load balancer routes proxied traffic to
//! registered service instances, and a two-phase-commit coordinator drives
//! distributed transactions across remote participants.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod proxy;
pub mod registry;
pub mod types;

// Re-export main types
pub use config::GatewayConfig;
pub use coordinator::TransactionCoordinator;
pub use error::GatewayError;
pub use http::HttpServer;
pub use registry::ServiceRegistry;
pub use types::*;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway version information
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gateway name
pub const GATEWAY_NAME: &str = "meridian-gateway";

/// Default gateway endpoint
pub const DEFAULT_GATEWAY_ENDPOINT: &str = "0.0.0.0:8080";

/// Default downstream request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Default consecutive-error threshold before a breaker opens
pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;

/// Default open-breaker cooldown as a multiple of the request timeout
pub const DEFAULT_ERROR_TIMEOUT_MULTIPLIER: f64 = 3.5;

/// Default max request body size in bytes
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024; // 10MB
