//! Types for Meridian Gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a single registered instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceHealth {
    Up,
    Down,
}

/// One physical endpoint of a named service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Instance host
    pub host: String,

    /// Instance port
    pub port: u16,

    /// Instance health
    pub health: InstanceHealth,

    /// When the instance health was last updated
    pub last_checked: DateTime<Utc>,

    /// When the instance was registered, used to compute uptime
    pub registered_at: DateTime<Utc>,

    /// Message of the last failure observed on this instance
    pub last_error: Option<String>,
}

impl ServiceInstance {
    /// Create a freshly registered instance, considered healthy until a
    /// proxied call says otherwise
    pub fn new(host: String, port: u16) -> Self {
        let now = Utc::now();
        Self {
            host,
            port,
            health: InstanceHealth::Up,
            last_checked: now,
            registered_at: now,
            last_error: None,
        }
    }

    /// Base URL of this instance
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Instance uptime broken into components
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Uptime {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Uptime {
    /// Compute uptime from a registration timestamp
    pub fn since(registered_at: DateTime<Utc>) -> Self {
        let seconds = (Utc::now() - registered_at).num_seconds().max(0);
        Self {
            hours: seconds / 3600,
            minutes: (seconds % 3600) / 60,
            seconds: seconds % 60,
        }
    }
}

/// Read-only view of a single instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub host: String,
    pub port: u16,
    pub health: InstanceHealth,
    pub last_checked: DateTime<Utc>,
    pub last_error: Option<String>,
    pub uptime: Uptime,
}

/// Read-only view of a service entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    pub instances: Vec<InstanceSnapshot>,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub circuit_breaker_status: CircuitState,
    pub error_count: u32,
    pub last_error_time: Option<DateTime<Utc>>,
    pub current_load_balancer_index: usize,
}

/// Aggregate gateway health
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub services: Vec<ServiceHealthSummary>,
}

/// Per-service line in the aggregate health report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthSummary {
    pub name: String,
    pub status: InstanceHealth,
    pub circuit_breaker_status: CircuitState,
    pub active_instances: usize,
    pub total_instances: usize,
    pub last_error: Option<LastErrorInfo>,
}

/// Humanized last-error information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastErrorInfo {
    pub time: DateTime<Utc>,
    pub time_since: String,
}

/// Participant vote in the prepare phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vote {
    Commit,
    Abort,
}

/// One participant's recorded vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Participant endpoint URL
    pub participant: String,

    /// The vote itself
    pub vote: Vote,

    /// Reason attached to an abort vote, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    ReadyToCommit,
    Aborted,
    Committed,
    PartiallyCommitted,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "PENDING"),
            TransactionStatus::ReadyToCommit => write!(f, "READY_TO_COMMIT"),
            TransactionStatus::Aborted => write!(f, "ABORTED"),
            TransactionStatus::Committed => write!(f, "COMMITTED"),
            TransactionStatus::PartiallyCommitted => write!(f, "PARTIALLY_COMMITTED"),
        }
    }
}

/// Per-participant outcome of a commit or abort phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Committed,
    CommitFailed,
    Aborted,
    AbortFailed,
}

/// One participant's result in a commit or abort phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantOutcome {
    /// Participant endpoint URL
    pub participant: String,

    /// Phase outcome for this participant
    pub status: OutcomeStatus,

    /// Details object returned by the participant on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Failure reason when the participant call did not succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Full read-only transaction record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub participants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub votes: Vec<VoteRecord>,
    pub commit_results: Vec<ParticipantOutcome>,
    pub abort_results: Vec<ParticipantOutcome>,
    pub log: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_wire_format() {
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"HALF_OPEN\""
        );
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
    }

    #[test]
    fn test_transaction_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&TransactionStatus::ReadyToCommit).unwrap(),
            "\"READY_TO_COMMIT\""
        );
        assert_eq!(
            serde_json::to_string(&TransactionStatus::PartiallyCommitted).unwrap(),
            "\"PARTIALLY_COMMITTED\""
        );
    }

    #[test]
    fn test_uptime_breakdown() {
        let registered = Utc::now() - chrono::Duration::seconds(3_725);
        let uptime = Uptime::since(registered);
        assert_eq!(uptime.hours, 1);
        assert_eq!(uptime.minutes, 2);
        assert!(uptime.seconds >= 5 && uptime.seconds <= 6);
    }

    #[test]
    fn test_instance_starts_up() {
        let instance = ServiceInstance::new("localhost".to_string(), 9001);
        assert_eq!(instance.health, InstanceHealth::Up);
        assert!(instance.last_error.is_none());
        assert_eq!(instance.base_url(), "http://localhost:9001");
    }
}
