//! Error types for Meridian Gateway

use thiserror::Error;

/// Error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Circuit breaker is {0}")]
    CircuitOpen(String),

    #[error("No healthy instances available for service: {0}")]
    NoHealthyInstance(String),

    #[error("Request timeout: {0}")]
    RequestTimeout(String),

    #[error("Downstream error: status {status}")]
    Downstream { status: u16, body: String },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Invalid transaction state: {0}")]
    InvalidTransactionState(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether this failure marks the chosen instance unhealthy and counts
    /// toward the circuit breaker's error threshold. Downstream 4xx
    /// responses indicate caller fault, not instance unhealthiness, and are
    /// passed through without penalizing the instance.
    pub fn counts_toward_breaker(&self) -> bool {
        match self {
            GatewayError::RequestTimeout(_) | GatewayError::Network(_) => true,
            GatewayError::Downstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        GatewayError::RequestTimeout(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}
