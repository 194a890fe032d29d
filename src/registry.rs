//! Service registry with per-service health tracking, round-robin load
//! balancing, and a circuit breaker protecting failing services

use crate::{
    config::UpstreamConfig,
    error::GatewayError,
    types::{
        CircuitState, HealthReport, InstanceHealth, InstanceSnapshot, LastErrorInfo,
        ServiceHealthSummary, ServiceInstance, ServiceSnapshot, Uptime,
    },
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Per-service mutable state. All fields form a single unit of mutual
/// exclusion: the breaker decision and instance selection for one request
/// must observe and update them atomically.
#[derive(Debug)]
struct ServiceEntry {
    instances: Vec<ServiceInstance>,
    next_index: usize,
    consecutive_errors: u32,
    circuit_state: CircuitState,
    last_error_at: Option<Instant>,
    last_error_time: Option<DateTime<Utc>>,
    half_open_probes: u32,
}

impl ServiceEntry {
    fn new() -> Self {
        Self {
            instances: Vec::new(),
            next_index: 0,
            consecutive_errors: 0,
            circuit_state: CircuitState::Closed,
            last_error_at: None,
            last_error_time: None,
            half_open_probes: 0,
        }
    }

    /// Circuit breaker gate. An open breaker denies until the cooldown
    /// elapses, then flips to half-open; half-open permits at most two
    /// probes before denying further traffic. The permit that leaves the
    /// open state consumes the first probe slot.
    fn should_attempt(&mut self, name: &str, error_timeout: Duration) -> bool {
        match self.circuit_state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = self
                    .last_error_at
                    .map(|at| at.elapsed() > error_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    self.circuit_state = CircuitState::HalfOpen;
                    self.half_open_probes = 1;
                    info!("Circuit breaker half-open for {}, probing", name);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_probes >= 2 {
                    false
                } else {
                    self.half_open_probes += 1;
                    true
                }
            }
        }
    }

    /// Round-robin selection: scan from the rotation cursor, wrapping at
    /// most once, and return the first healthy instance. Half-open probes
    /// may target an unhealthy instance; after an outage takes every
    /// instance down, the probe is the only path back to healthy.
    fn select_instance(&mut self) -> Option<(usize, ServiceInstance)> {
        let total = self.instances.len();
        if total == 0 {
            return None;
        }
        for offset in 0..total {
            let index = (self.next_index + offset) % total;
            if self.instances[index].health == InstanceHealth::Up {
                self.next_index = (index + 1) % total;
                return Some((index, self.instances[index].clone()));
            }
        }
        if self.circuit_state == CircuitState::HalfOpen {
            let index = self.next_index % total;
            self.next_index = (index + 1) % total;
            return Some((index, self.instances[index].clone()));
        }
        None
    }

    fn record_success(&mut self, name: &str, index: usize) {
        if let Some(instance) = self.instances.get_mut(index) {
            instance.health = InstanceHealth::Up;
            instance.last_checked = Utc::now();
            instance.last_error = None;
        }
        if self.circuit_state == CircuitState::HalfOpen {
            self.circuit_state = CircuitState::Closed;
            self.consecutive_errors = 0;
            self.last_error_at = None;
            self.last_error_time = None;
            info!("Circuit breaker restored to CLOSED for {}", name);
        }
    }

    fn record_failure(&mut self, name: &str, index: usize, message: String, threshold: u32) {
        self.consecutive_errors += 1;
        self.last_error_at = Some(Instant::now());
        self.last_error_time = Some(Utc::now());

        if let Some(instance) = self.instances.get_mut(index) {
            instance.health = InstanceHealth::Down;
            instance.last_checked = Utc::now();
            instance.last_error = Some(message);
        }

        match self.circuit_state {
            CircuitState::HalfOpen => {
                self.circuit_state = CircuitState::Open;
                warn!(
                    "Circuit breaker returned to OPEN for {} - failed during half-open probe",
                    name
                );
            }
            CircuitState::Closed if self.consecutive_errors >= threshold => {
                self.circuit_state = CircuitState::Open;
                warn!("Circuit breaker OPENED for {} - error threshold reached", name);
            }
            _ => {}
        }
    }

    fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            instances: self
                .instances
                .iter()
                .map(|instance| InstanceSnapshot {
                    host: instance.host.clone(),
                    port: instance.port,
                    health: instance.health,
                    last_checked: instance.last_checked,
                    last_error: instance.last_error.clone(),
                    uptime: Uptime::since(instance.registered_at),
                })
                .collect(),
            total_instances: self.instances.len(),
            healthy_instances: self
                .instances
                .iter()
                .filter(|instance| instance.health == InstanceHealth::Up)
                .count(),
            circuit_breaker_status: self.circuit_state,
            error_count: self.consecutive_errors,
            last_error_time: self.last_error_time,
            current_load_balancer_index: self.next_index,
        }
    }
}

/// Service registry. Owns every service entry; the HTTP surface talks to it
/// exclusively through `handle_request` and the snapshot accessors.
pub struct ServiceRegistry {
    config: UpstreamConfig,
    services: RwLock<HashMap<String, Arc<Mutex<ServiceEntry>>>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register an instance of a named service, creating the service entry
    /// on first registration. Always succeeds.
    pub async fn register(&self, name: &str, host: &str, port: u16) {
        let entry = {
            let mut services = self.services.write().await;
            services
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ServiceEntry::new())))
                .clone()
        };

        let mut entry = entry.lock().await;
        entry
            .instances
            .push(ServiceInstance::new(host.to_string(), port));
        info!("Registered {} instance {}:{}", name, host, port);
    }

    /// Remove a service and all of its instances. Returns whether the
    /// service existed.
    pub async fn deregister(&self, name: &str) -> bool {
        let removed = self.services.write().await.remove(name).is_some();
        if removed {
            info!("Deregistered service {}", name);
        }
        removed
    }

    /// Route one request: evaluate the breaker, pick an instance, run the
    /// downstream operation under the request timeout, and record the
    /// outcome. The downstream call runs outside the entry lock; only the
    /// gate-plus-selection step and the post-completion bookkeeping hold it.
    pub async fn handle_request<F, Fut, T>(
        &self,
        name: &str,
        operation: F,
    ) -> Result<T, GatewayError>
    where
        F: FnOnce(ServiceInstance) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let entry = self
            .services
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NoHealthyInstance(name.to_string()))?;

        let (index, instance) = {
            let mut entry = entry.lock().await;
            if !entry.should_attempt(name, self.config.error_timeout()) {
                return Err(GatewayError::CircuitOpen(entry.circuit_state.to_string()));
            }
            entry
                .select_instance()
                .ok_or_else(|| GatewayError::NoHealthyInstance(name.to_string()))?
        };

        debug!("Dispatching {} request to {}:{}", name, instance.host, instance.port);

        let result = match timeout(self.config.request_timeout, operation(instance.clone())).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::RequestTimeout(format!(
                "{} did not respond within {:?}",
                instance.base_url(),
                self.config.request_timeout
            ))),
        };

        let mut entry = entry.lock().await;
        match &result {
            Err(err) if err.counts_toward_breaker() => {
                entry.record_failure(name, index, err.to_string(), self.config.error_threshold);
            }
            _ => entry.record_success(name, index),
        }

        result
    }

    /// Snapshot of every registered service
    pub async fn get_all_services(&self) -> HashMap<String, ServiceSnapshot> {
        let services = self.services.read().await;
        let mut snapshots = HashMap::new();
        for (name, entry) in services.iter() {
            snapshots.insert(name.clone(), entry.lock().await.snapshot());
        }
        snapshots
    }

    /// Snapshot of a single service
    pub async fn get_service(&self, name: &str) -> Option<ServiceSnapshot> {
        let entry = self.services.read().await.get(name).cloned()?;
        let snapshot = entry.lock().await.snapshot();
        Some(snapshot)
    }

    /// Aggregate health report: DEGRADED when any service has no healthy
    /// instances left
    pub async fn get_health(&self) -> HealthReport {
        let snapshots = self.get_all_services().await;
        let now = Utc::now();

        let mut services: Vec<ServiceHealthSummary> = snapshots
            .into_iter()
            .map(|(name, snapshot)| ServiceHealthSummary {
                name,
                status: if snapshot.healthy_instances > 0 {
                    InstanceHealth::Up
                } else {
                    InstanceHealth::Down
                },
                circuit_breaker_status: snapshot.circuit_breaker_status,
                active_instances: snapshot.healthy_instances,
                total_instances: snapshot.total_instances,
                last_error: snapshot.last_error_time.map(|time| LastErrorInfo {
                    time,
                    time_since: format!("{} seconds ago", (now - time).num_seconds().max(0)),
                }),
            })
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));

        let degraded = services.iter().any(|s| s.status == InstanceHealth::Down);
        HealthReport {
            status: if degraded { "DEGRADED" } else { "UP" }.to_string(),
            timestamp: now,
            services,
        }
    }
}
