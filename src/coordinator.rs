//! Two-phase-commit transaction coordinator
//!
//! Drives a set of remote participants through prepare/commit/abort.
//! Participant failures are never retried: a failed prepare call becomes an
//! abort vote, a failed commit call leaves the transaction partially
//! committed for external reconciliation.

use crate::{
    config::TransactionConfig,
    error::GatewayError,
    types::{OutcomeStatus, ParticipantOutcome, TransactionRecord, TransactionStatus, Vote, VoteRecord},
};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

/// One 2PC run. Mutated only by the coordinator's phase methods, behind a
/// per-transaction mutex.
#[derive(Debug)]
struct Transaction {
    id: String,
    participants: Vec<String>,
    status: TransactionStatus,
    votes: Vec<VoteRecord>,
    commit_results: Vec<ParticipantOutcome>,
    abort_results: Vec<ParticipantOutcome>,
    created_at: DateTime<Utc>,
    log: Vec<String>,
}

impl Transaction {
    fn new(participants: Vec<String>) -> Self {
        let mut transaction = Self {
            id: uuid::Uuid::new_v4().to_string(),
            participants,
            status: TransactionStatus::Pending,
            votes: Vec::new(),
            commit_results: Vec::new(),
            abort_results: Vec::new(),
            created_at: Utc::now(),
            log: Vec::new(),
        };
        transaction.log_event("Transaction created");
        transaction
    }

    fn log_event(&mut self, event: impl AsRef<str>) {
        self.log
            .push(format!("{} {}", Utc::now().to_rfc3339(), event.as_ref()));
    }

    fn record(&self) -> TransactionRecord {
        TransactionRecord {
            transaction_id: self.id.clone(),
            status: self.status,
            participants: self.participants.clone(),
            created_at: self.created_at,
            votes: self.votes.clone(),
            commit_results: self.commit_results.clone(),
            abort_results: self.abort_results.clone(),
            log: self.log.clone(),
        }
    }
}

/// Map entry keeping the creation timestamp outside the transaction mutex
/// so the retention sweep never contends with in-flight phases.
#[derive(Clone)]
struct TransactionHandle {
    created_at: DateTime<Utc>,
    inner: Arc<Mutex<Transaction>>,
}

/// Wire shape of a participant's prepare response
#[derive(Debug, Deserialize)]
struct PrepareResponse {
    vote: Vote,
    reason: Option<String>,
}

/// Transaction coordinator. Participants are addressed directly by URL and
/// are expected to expose POST /prepare, /commit, and /abort.
pub struct TransactionCoordinator {
    config: TransactionConfig,
    client: Client,
    transactions: RwLock<HashMap<String, TransactionHandle>>,
}

impl TransactionCoordinator {
    /// Create a coordinator with no transactions
    pub fn new(config: TransactionConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a new transaction over the given participant endpoints
    pub async fn create_transaction(&self, participants: Vec<String>) -> TransactionRecord {
        let transaction = Transaction::new(participants);
        let record = transaction.record();
        let handle = TransactionHandle {
            created_at: transaction.created_at,
            inner: Arc::new(Mutex::new(transaction)),
        };
        self.transactions
            .write()
            .await
            .insert(record.transaction_id.clone(), handle);
        info!(
            "Created transaction {} with {} participants",
            record.transaction_id,
            record.participants.len()
        );
        record
    }

    async fn lookup(&self, id: &str) -> Result<Arc<Mutex<Transaction>>, GatewayError> {
        self.transactions
            .read()
            .await
            .get(id)
            .map(|handle| handle.inner.clone())
            .ok_or_else(|| GatewayError::TransactionNotFound(id.to_string()))
    }

    /// Phase one: collect a vote from every participant concurrently. A
    /// participant that cannot be reached, answers non-2xx, or returns an
    /// unparseable body is recorded as an abort vote with the failure
    /// reason. Unanimous commit votes move the transaction to
    /// READY_TO_COMMIT, anything else aborts it.
    pub async fn prepare_phase(&self, id: &str) -> Result<TransactionRecord, GatewayError> {
        let transaction = self.lookup(id).await?;
        let mut transaction = transaction.lock().await;
        if transaction.status != TransactionStatus::Pending {
            return Err(GatewayError::InvalidTransactionState(format!(
                "prepare requires PENDING, transaction {} is {}",
                id, transaction.status
            )));
        }

        transaction.log_event("Prepare phase started");
        let votes = self
            .collect_votes(&transaction.participants, &transaction.id)
            .await;

        let can_commit = votes.iter().all(|record| record.vote == Vote::Commit);
        transaction.votes = votes;
        transaction.status = if can_commit {
            TransactionStatus::ReadyToCommit
        } else {
            TransactionStatus::Aborted
        };
        transaction.log_event(format!("Prepare phase completed, commit possible: {}", can_commit));
        info!(
            "Transaction {} prepare phase finished: {}",
            id, transaction.status
        );
        Ok(transaction.record())
    }

    /// Phase two: tell every participant to commit, concurrently. Each
    /// participant's outcome is recorded independently; a failure does not
    /// stop the others and is not retried. Anything short of unanimous
    /// success leaves the transaction PARTIALLY_COMMITTED.
    pub async fn commit_phase(&self, id: &str) -> Result<TransactionRecord, GatewayError> {
        let transaction = self.lookup(id).await?;
        let mut transaction = transaction.lock().await;
        if transaction.status != TransactionStatus::ReadyToCommit {
            return Err(GatewayError::InvalidTransactionState(format!(
                "commit requires READY_TO_COMMIT, transaction {} is {}",
                id, transaction.status
            )));
        }

        transaction.log_event("Commit phase started");
        let results = self
            .fan_out(
                &transaction.participants,
                &transaction.id,
                "commit",
                OutcomeStatus::Committed,
                OutcomeStatus::CommitFailed,
            )
            .await;

        let all_committed = results
            .iter()
            .all(|outcome| outcome.status == OutcomeStatus::Committed);
        transaction.commit_results = results;
        transaction.status = if all_committed {
            TransactionStatus::Committed
        } else {
            TransactionStatus::PartiallyCommitted
        };
        let commit_log = format!("Commit phase completed with status {}", transaction.status);
        transaction.log_event(commit_log);
        if !all_committed {
            warn!(
                "Transaction {} is PARTIALLY_COMMITTED and needs external reconciliation",
                id
            );
        }
        Ok(transaction.record())
    }

    /// Explicit abort, usable from any state. Participant abort failures
    /// are recorded but never block the transaction from closing as
    /// ABORTED.
    pub async fn abort_transaction(&self, id: &str) -> Result<TransactionRecord, GatewayError> {
        let transaction = self.lookup(id).await?;
        let mut transaction = transaction.lock().await;

        transaction.log_event("Abort requested");
        let results = self
            .fan_out(
                &transaction.participants,
                &transaction.id,
                "abort",
                OutcomeStatus::Aborted,
                OutcomeStatus::AbortFailed,
            )
            .await;

        transaction.abort_results = results;
        transaction.status = TransactionStatus::Aborted;
        transaction.log_event("Transaction aborted");
        info!("Transaction {} aborted", id);
        Ok(transaction.record())
    }

    /// Full read-only transaction record
    pub async fn get_status(&self, id: &str) -> Result<TransactionRecord, GatewayError> {
        let transaction = self.lookup(id).await?;
        let transaction = transaction.lock().await;
        Ok(transaction.record())
    }

    /// Drop every transaction older than `max_age`. Returns how many were
    /// removed. Runs concurrently with in-flight phases: creation times
    /// live outside the per-transaction mutex, and a removed transaction's
    /// state stays alive for whoever still holds it.
    pub async fn cleanup_old_transactions(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut transactions = self.transactions.write().await;
        let before = transactions.len();
        transactions.retain(|_, handle| handle.created_at > cutoff);
        let removed = before - transactions.len();
        if removed > 0 {
            info!("Cleaned up {} expired transactions", removed);
        }
        removed
    }

    /// Spawn the periodic retention sweep
    pub fn spawn_retention_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let retention = self.config.retention;
        let sweep_interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                self.cleanup_old_transactions(retention).await;
            }
        })
    }

    async fn collect_votes(&self, participants: &[String], id: &str) -> Vec<VoteRecord> {
        let mut handles = Vec::new();
        for participant in participants {
            let client = self.client.clone();
            let participant = participant.clone();
            let id = id.to_string();
            let budget = self.config.participant_timeout;
            handles.push(tokio::spawn(async move {
                match call_participant(&client, &participant, "prepare", &id, budget).await {
                    Ok(body) => match serde_json::from_value::<PrepareResponse>(body) {
                        Ok(response) => VoteRecord {
                            participant,
                            vote: response.vote,
                            reason: response.reason,
                        },
                        Err(err) => VoteRecord {
                            participant,
                            vote: Vote::Abort,
                            reason: Some(format!("unparseable prepare response: {}", err)),
                        },
                    },
                    Err(reason) => VoteRecord {
                        participant,
                        vote: Vote::Abort,
                        reason: Some(reason),
                    },
                }
            }));
        }

        let mut votes = Vec::new();
        for (participant, handle) in participants.iter().zip(handles) {
            votes.push(handle.await.unwrap_or_else(|err| VoteRecord {
                participant: participant.clone(),
                vote: Vote::Abort,
                reason: Some(format!("prepare task failed: {}", err)),
            }));
        }
        votes
    }

    async fn fan_out(
        &self,
        participants: &[String],
        id: &str,
        action: &'static str,
        ok_status: OutcomeStatus,
        failed_status: OutcomeStatus,
    ) -> Vec<ParticipantOutcome> {
        let mut handles = Vec::new();
        for participant in participants {
            let client = self.client.clone();
            let participant = participant.clone();
            let id = id.to_string();
            let budget = self.config.participant_timeout;
            handles.push(tokio::spawn(async move {
                match call_participant(&client, &participant, action, &id, budget).await {
                    Ok(details) => ParticipantOutcome {
                        participant,
                        status: ok_status,
                        details: Some(details),
                        reason: None,
                    },
                    Err(reason) => ParticipantOutcome {
                        participant,
                        status: failed_status,
                        details: None,
                        reason: Some(reason),
                    },
                }
            }));
        }

        let mut outcomes = Vec::new();
        for (participant, handle) in participants.iter().zip(handles) {
            outcomes.push(handle.await.unwrap_or_else(|err| ParticipantOutcome {
                participant: participant.clone(),
                status: failed_status,
                details: None,
                reason: Some(format!("{} task failed: {}", action, err)),
            }));
        }
        outcomes
    }
}

/// POST one phase request to a participant under the per-call budget.
/// Non-2xx responses, transport errors, and timeouts all collapse to an
/// error string used as the recorded failure reason.
async fn call_participant(
    client: &Client,
    participant: &str,
    action: &str,
    transaction_id: &str,
    budget: Duration,
) -> Result<serde_json::Value, String> {
    let url = format!("{}/{}", participant.trim_end_matches('/'), action);
    let body = json!({
        "transactionId": transaction_id,
        "timestamp": Utc::now().to_rfc3339(),
    });

    let response = timeout(budget, client.post(&url).json(&body).send())
        .await
        .map_err(|_| format!("{} timed out after {:?}", action, budget))?
        .map_err(|err| err.to_string())?;

    if !response.status().is_success() {
        return Err(format!("{} returned HTTP {}", action, response.status()));
    }
    response
        .json::<serde_json::Value>()
        .await
        .map_err(|err| format!("invalid {} response body: {}", action, err))
}
