//! Tier selection and failover across an ordered list of backends.
//!
//! All decisions happen under one exclusive lock: an operation walks the backend
//! ring starting at the active index, touching each backend at most once, and
//! demotes the active backend after `failure_threshold` failures. The only work
//! done outside the lock is waiting on a human for manual entry.

use std::{any::Any, cmp::Reverse, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::{
    sync::{watch, Mutex},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    config::OrchestratorConfig,
    health::{BackendInfo, HealthSnapshot},
    outcome::{ErrorKind, OperationOutcome},
    storage::{Lookup, PendingEntry, SecureStore, SecurityTier, StoreError},
};

/// Coarse lifecycle of the orchestrator, derived from its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorPhase {
    Uninitialized,
    /// Serving from the highest configured tier with no outstanding failures.
    Active(SecurityTier),
    /// Serving, but from a lower tier or with recent failures.
    Degraded(SecurityTier),
    /// No backend could serve the last request.
    Exhausted,
}

struct BackendRecord {
    store: Arc<dyn SecureStore>,
    tier: SecurityTier,
    failure_count: u32,
}

struct OrchestratorState {
    backends: Vec<BackendRecord>,
    active_index: usize,
    health: HealthSnapshot,
    last_health_check_at: Option<Instant>,
    initialized: bool,
}

impl OrchestratorState {
    fn select(&mut self, index: usize) {
        self.active_index = index;
        let record = &mut self.backends[index];
        record.failure_count = 0;
        self.health = self.health.selected(record.tier);
    }
}

enum Step<T> {
    Ready(T),
    Deferred(PendingEntry),
}

enum Attempt<T> {
    Finished(OperationOutcome<T>),
    Deferred {
        index: usize,
        tier: SecurityTier,
        pending: PendingEntry,
    },
}

/// Owns the backend list and every piece of mutable failover state.
pub struct StorageOrchestrator {
    state: Mutex<OrchestratorState>,
    config: OrchestratorConfig,
    health_tx: watch::Sender<HealthSnapshot>,
}

impl StorageOrchestrator {
    /// Backends are ranked by tier, strongest first; equal tiers keep the given order.
    pub fn new(mut backends: Vec<Arc<dyn SecureStore>>, config: OrchestratorConfig) -> Self {
        backends.sort_by_key(|store| Reverse(store.tier()));
        let backends = backends
            .into_iter()
            .map(|store| BackendRecord {
                tier: store.tier(),
                store,
                failure_count: 0,
            })
            .collect();
        let (health_tx, _) = watch::channel(HealthSnapshot::initial());

        Self {
            state: Mutex::new(OrchestratorState {
                backends,
                active_index: 0,
                health: HealthSnapshot::initial(),
                last_health_check_at: None,
                initialized: false,
            }),
            config,
            health_tx,
        }
    }

    /// Probe backends in priority order and activate the first one that is
    /// available and passes its health check.
    pub async fn initialize(&self) -> OperationOutcome<SecurityTier> {
        let mut state = self.state.lock().await;
        state.initialized = true;
        state.last_health_check_at = Some(Instant::now());

        let order: Vec<usize> = (0..state.backends.len()).collect();
        let outcome = match first_viable(&state.backends, order).await {
            Some(index) => {
                state.select(index);
                let tier = state.backends[index].tier;
                info!(%tier, backend = state.backends[index].store.name(), "storage tier selected");
                OperationOutcome::success(tier, tier)
            }
            None => {
                warn!("no storage backend passed initialization");
                state.health = state
                    .health
                    .exhausted(Some(ErrorKind::AllBackendsExhausted.to_string()));
                OperationOutcome::failure(ErrorKind::AllBackendsExhausted, SecurityTier::None)
            }
        };
        self.publish(&state);
        outcome
    }

    pub async fn get_string(&self, key: &str) -> OperationOutcome<Option<String>> {
        let attempt = self
            .attempt("get", |store| async move {
                store.lookup(key).await.map(|lookup| match lookup {
                    Lookup::Ready(value) => Step::Ready(value),
                    Lookup::Deferred(pending) => Step::Deferred(pending),
                })
            })
            .await;

        match attempt {
            Attempt::Finished(outcome) => outcome,
            Attempt::Deferred {
                index,
                tier,
                pending,
            } => {
                info!(request_id = %pending.request().request_id, "waiting for manual entry");
                let answer = pending.wait().await;
                self.settle_deferred(index, tier, answer).await
            }
        }
    }

    pub async fn set_string(&self, key: &str, value: &str) -> OperationOutcome<()> {
        self.run("set", |store| async move { store.set_string(key, value).await })
            .await
    }

    pub async fn remove(&self, key: &str) -> OperationOutcome<bool> {
        self.run("remove", |store| async move { store.remove(key).await })
            .await
    }

    pub async fn contains(&self, key: &str) -> OperationOutcome<bool> {
        self.run("contains", |store| async move { store.contains(key).await })
            .await
    }

    pub async fn clear(&self) -> OperationOutcome<()> {
        self.run("clear", |store| async move { store.clear().await })
            .await
    }

    /// Throttled health check. Within `health_check_interval` of the previous
    /// check the cached snapshot is returned untouched.
    pub async fn perform_health_check(&self) -> HealthSnapshot {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(last) = state.last_health_check_at {
            if now.duration_since(last) < self.config.health_check_interval {
                return state.health.clone();
            }
        }
        state.last_health_check_at = Some(now);
        state.initialized = true;

        let total = state.backends.len();
        let active = state.active_index;
        if total > 0 && is_viable(&state.backends[active]).await {
            debug!(tier = %state.backends[active].tier, "active backend passed health check");
            state.select(active);
        } else {
            warn!("active backend failed health check, rescanning");
            match first_viable(&state.backends, (0..total).collect()).await {
                Some(index) => {
                    state.select(index);
                    info!(tier = %state.backends[index].tier, "storage tier reselected");
                }
                None => {
                    state.health = state
                        .health
                        .exhausted(Some("no backend passed health check".to_string()));
                }
            }
        }

        self.publish(&state);
        state.health.clone()
    }

    /// Move to the next viable backend after the active one, ignoring the
    /// throttle and failure counts. Reports `NoFailoverTarget` when nothing else
    /// is viable, in which case the active backend is left as is.
    pub async fn force_failover(&self) -> OperationOutcome<SecurityTier> {
        let mut state = self.state.lock().await;
        let total = state.backends.len();
        let current = state.active_index;
        let order: Vec<usize> = (1..total).map(|offset| (current + offset) % total).collect();

        match first_viable(&state.backends, order).await {
            Some(index) => {
                let from = state.backends[current].tier;
                state.select(index);
                state.initialized = true;
                state.last_health_check_at = Some(Instant::now());
                let tier = state.backends[index].tier;
                info!(%from, to = %tier, "forced failover");
                self.publish(&state);
                OperationOutcome::success(tier, tier)
            }
            None => {
                info!("forced failover found no alternative backend");
                OperationOutcome::failure(ErrorKind::NoFailoverTarget, state.health.active_tier)
            }
        }
    }

    /// Probe every backend for diagnostics. Does not change the active backend.
    pub async fn list_backend_info(&self) -> Vec<BackendInfo> {
        let state = self.state.lock().await;
        let mut infos = Vec::with_capacity(state.backends.len());
        for (index, record) in state.backends.iter().enumerate() {
            let available = record.store.is_available();
            let passes_health_check = available && is_viable(record).await;
            infos.push(BackendInfo {
                name: record.store.name().to_string(),
                tier: record.tier,
                available,
                passes_health_check,
                failure_count: record.failure_count,
                active: index == state.active_index,
            });
        }
        infos
    }

    /// Latest published snapshot, read without taking the state lock.
    pub fn health(&self) -> HealthSnapshot {
        self.health_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.health_tx.subscribe()
    }

    pub async fn phase(&self) -> OrchestratorPhase {
        let state = self.state.lock().await;
        let tier = state.health.active_tier;
        if !state.initialized {
            OrchestratorPhase::Uninitialized
        } else if tier == SecurityTier::None {
            OrchestratorPhase::Exhausted
        } else if state.active_index == 0
            && state.health.consecutive_failures == 0
            && state.backends.first().map(|r| r.tier) == Some(tier)
        {
            OrchestratorPhase::Active(tier)
        } else {
            OrchestratorPhase::Degraded(tier)
        }
    }

    pub async fn active_index(&self) -> usize {
        self.state.lock().await.active_index
    }

    /// Failure counters in priority order.
    pub async fn failure_counts(&self) -> Vec<u32> {
        let state = self.state.lock().await;
        state.backends.iter().map(|r| r.failure_count).collect()
    }

    /// Record a fault that escaped a backend (e.g. a panic caught by the facade).
    pub async fn record_fault(&self, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.state.lock().await;
        warn!(error = %message, "storage fault recorded");
        state.health = state.health.faulted(message);
        self.publish(&state);
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, op: F) -> OperationOutcome<T>
    where
        F: Fn(Arc<dyn SecureStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempt = self
            .attempt(operation, |store| {
                let fut = op(store);
                async move { fut.await.map(Step::Ready) }
            })
            .await;

        match attempt {
            Attempt::Finished(outcome) => outcome,
            // Only lookups defer; the dropped entry skips its request.
            Attempt::Deferred { tier, .. } => OperationOutcome::failure(
                ErrorKind::OperationFailed(format!("{operation} cannot be deferred")),
                tier,
            ),
        }
    }

    /// The fallback loop. Holds the state lock for the whole decision sequence
    /// and releases it early only when a backend defers.
    async fn attempt<T, F, Fut>(&self, operation: &'static str, op: F) -> Attempt<T>
    where
        F: Fn(Arc<dyn SecureStore>) -> Fut,
        Fut: Future<Output = Result<Step<T>, StoreError>>,
    {
        let mut state = self.state.lock().await;
        state.initialized = true;
        let total = state.backends.len();
        let mut cursor = state.active_index;
        let mut last_error: Option<StoreError> = None;

        for _ in 0..total {
            let store = Arc::clone(&state.backends[cursor].store);
            let tier = state.backends[cursor].tier;

            let result = if store.is_available() {
                match AssertUnwindSafe(op(Arc::clone(&store))).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(StoreError::storage(format!(
                        "{} backend panicked: {}",
                        store.name(),
                        panic_message(panic.as_ref())
                    ))),
                }
            } else {
                Err(StoreError::unavailable(format!("{} backend not available", store.name())))
            };

            match result {
                Ok(Step::Ready(value)) => {
                    state.backends[cursor].failure_count = 0;
                    state.health = state.health.succeeded(tier);
                    self.publish(&state);
                    return Attempt::Finished(OperationOutcome::success(value, tier));
                }
                Ok(Step::Deferred(pending)) => {
                    drop(state);
                    return Attempt::Deferred {
                        index: cursor,
                        tier,
                        pending,
                    };
                }
                Err(err) => {
                    debug!(
                        operation,
                        backend = store.name(),
                        %tier,
                        %err,
                        "backend attempt failed"
                    );
                    let record = &mut state.backends[cursor];
                    record.failure_count = record.failure_count.saturating_add(1);
                    let failures = record.failure_count;
                    if cursor == state.active_index && failures >= self.config.failure_threshold {
                        state.active_index = (cursor + 1) % total;
                        warn!(
                            %tier,
                            failures,
                            next = %state.backends[state.active_index].tier,
                            "demoting storage backend"
                        );
                    }
                    state.health = state.health.failed_attempt(err.to_string());
                    last_error = Some(err);
                    cursor = (cursor + 1) % total;
                }
            }
        }

        warn!(operation, attempts = total, "all storage backends exhausted");
        state.health = state.health.exhausted(
            last_error
                .map(|err| err.to_string())
                .or_else(|| Some("no storage backends configured".to_string())),
        );
        self.publish(&state);
        Attempt::Finished(OperationOutcome::failure(
            ErrorKind::AllBackendsExhausted,
            SecurityTier::None,
        ))
    }

    /// Re-enter the lock after a manual-entry wait, only to record its outcome.
    async fn settle_deferred(
        &self,
        index: usize,
        tier: SecurityTier,
        answer: Result<String, StoreError>,
    ) -> OperationOutcome<Option<String>> {
        let mut state = self.state.lock().await;
        let outcome = match answer {
            Ok(value) => {
                state.backends[index].failure_count = 0;
                state.health = state.health.succeeded(tier);
                OperationOutcome::success(Some(value), tier)
            }
            Err(err) => {
                state.health = state.health.failed_attempt(err.to_string());
                OperationOutcome::failure(ErrorKind::from(&err), tier)
            }
        };
        self.publish(&state);
        outcome
    }

    fn publish(&self, state: &OrchestratorState) {
        let next = state.health.clone();
        self.health_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn is_viable(record: &BackendRecord) -> bool {
    if !record.store.is_available() {
        return false;
    }
    match AssertUnwindSafe(record.store.health_check()).catch_unwind().await {
        Ok(passed) => passed,
        Err(panic) => {
            warn!(
                backend = record.store.name(),
                message = %panic_message(panic.as_ref()),
                "health check panicked"
            );
            false
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn first_viable(backends: &[BackendRecord], order: Vec<usize>) -> Option<usize> {
    for index in order {
        if is_viable(&backends[index]).await {
            return Some(index);
        }
        debug!(tier = %backends[index].tier, "backend not viable");
    }
    None
}
