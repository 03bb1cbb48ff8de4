//! Crash-proof entry point for application code.
//!
//! Every call returns a plain value. Orchestrator failures and panics raised by
//! backends are turned into safe defaults (`None` / `false`) and show up on the
//! health snapshot instead.

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::{
    health::{BackendInfo, HealthSnapshot},
    orchestrator::{panic_message, StorageOrchestrator},
    outcome::{ErrorKind, OperationOutcome},
    storage::SecurityTier,
};

/// Initialization progress of the facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    NotInitialized,
    Ready,
    /// Initialization failed; data calls return defaults until `reset`.
    Failed(String),
}

pub struct RobustFacade {
    orchestrator: Arc<StorageOrchestrator>,
    init: Mutex<InitState>,
}

impl RobustFacade {
    pub fn new(orchestrator: Arc<StorageOrchestrator>) -> Self {
        Self {
            orchestrator,
            init: Mutex::new(InitState::NotInitialized),
        }
    }

    pub fn orchestrator(&self) -> &Arc<StorageOrchestrator> {
        &self.orchestrator
    }

    pub async fn init_state(&self) -> InitState {
        self.init.lock().await.clone()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if !self.ensure_initialized().await {
            return None;
        }
        self.guard("get", self.orchestrator.get_string(key))
            .await
            .and_then(OperationOutcome::ok)
            .flatten()
    }

    pub async fn set(&self, key: &str, value: &str) -> bool {
        if !self.ensure_initialized().await {
            return false;
        }
        self.guard("set", self.orchestrator.set_string(key, value))
            .await
            .is_some_and(|outcome| outcome.is_success())
    }

    /// Returns whether an entry was removed.
    pub async fn remove(&self, key: &str) -> bool {
        if !self.ensure_initialized().await {
            return false;
        }
        self.guard("remove", self.orchestrator.remove(key))
            .await
            .and_then(OperationOutcome::ok)
            .unwrap_or(false)
    }

    pub async fn contains(&self, key: &str) -> bool {
        if !self.ensure_initialized().await {
            return false;
        }
        self.guard("contains", self.orchestrator.contains(key))
            .await
            .and_then(OperationOutcome::ok)
            .unwrap_or(false)
    }

    pub async fn force_failover(&self) -> Result<SecurityTier, ErrorKind> {
        self.guard("force_failover", self.orchestrator.force_failover())
            .await
            .unwrap_or_else(|| {
                OperationOutcome::failure(
                    ErrorKind::OperationFailed("failover panicked".to_string()),
                    SecurityTier::None,
                )
            })
            .into_result()
    }

    pub async fn perform_health_check(&self) -> HealthSnapshot {
        match self
            .guard("health_check", self.orchestrator.perform_health_check())
            .await
        {
            Some(snapshot) => snapshot,
            None => self.orchestrator.health(),
        }
    }

    pub async fn list_backend_info(&self) -> Vec<BackendInfo> {
        self.guard("list_backend_info", self.orchestrator.list_backend_info())
            .await
            .unwrap_or_default()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.orchestrator.health()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.orchestrator.subscribe()
    }

    /// Forget a cached initialization failure and initialize again.
    pub async fn reset(&self) -> bool {
        *self.init.lock().await = InitState::NotInitialized;
        info!("storage facade reset requested");
        self.ensure_initialized().await
    }

    async fn ensure_initialized(&self) -> bool {
        let mut init = self.init.lock().await;
        match &*init {
            InitState::Ready => return true,
            InitState::Failed(_) => return false,
            InitState::NotInitialized => {}
        }

        match self.guard("initialize", self.orchestrator.initialize()).await {
            Some(OperationOutcome::Success { tier, .. }) => {
                info!(%tier, "secure storage ready");
                *init = InitState::Ready;
                true
            }
            Some(OperationOutcome::Failure { error, .. }) => {
                warn!(%error, "secure storage initialization failed");
                *init = InitState::Failed(error.to_string());
                false
            }
            None => {
                *init = InitState::Failed("initialization panicked".to_string());
                false
            }
        }
    }

    /// Run an orchestrator future, turning a panic into `None` plus a health update.
    async fn guard<T>(&self, operation: &'static str, fut: impl Future<Output = T>) -> Option<T> {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(value) => Some(value),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(operation, %message, "storage backend panicked");
                self.orchestrator
                    .record_fault(format!("{operation} panicked: {message}"))
                    .await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::OrchestratorConfig, orchestrator::OrchestratorPhase, storage::SecureStore,
        test_support::ScriptedStore,
    };

    fn facade(stores: &[&Arc<ScriptedStore>]) -> RobustFacade {
        let backends = stores
            .iter()
            .map(|s| Arc::clone(*s) as Arc<dyn SecureStore>)
            .collect();
        RobustFacade::new(Arc::new(StorageOrchestrator::new(
            backends,
            OrchestratorConfig::default(),
        )))
    }

    #[tokio::test]
    async fn initializes_lazily_on_first_call() {
        let memory = Arc::new(ScriptedStore::new("memory", SecurityTier::MemoryLow));
        let facade = facade(&[&memory]);
        assert_eq!(facade.init_state().await, InitState::NotInitialized);
        assert_eq!(
            facade.orchestrator().phase().await,
            OrchestratorPhase::Uninitialized
        );

        assert!(facade.set("api/key", "secret").await);
        assert_eq!(facade.init_state().await, InitState::Ready);
        assert_eq!(facade.get("api/key").await.as_deref(), Some("secret"));
        assert!(facade.contains("api/key").await);
        assert!(facade.remove("api/key").await);
        assert!(!facade.contains("api/key").await);
    }

    #[tokio::test]
    async fn failed_initialization_is_cached_until_reset() {
        let memory = Arc::new(ScriptedStore::new("memory", SecurityTier::MemoryLow));
        memory.fail_everything(true);
        let facade = facade(&[&memory]);

        assert_eq!(facade.get("k").await, None);
        assert!(!facade.set("k", "v").await);
        assert!(!facade.remove("k").await);
        assert_eq!(memory.health_probes(), 1, "initialization attempted once");
        assert_eq!(memory.attempts(), 0);
        assert!(matches!(facade.init_state().await, InitState::Failed(_)));

        memory.fail_everything(false);
        assert!(!facade.set("k", "v").await, "still cached as failed");
        assert!(facade.reset().await);
        assert_eq!(memory.health_probes(), 2);
        assert!(facade.set("k", "v").await);
    }

    #[tokio::test]
    async fn panicking_primary_fails_over_to_next_tier() {
        let encrypted = Arc::new(ScriptedStore::new("encrypted", SecurityTier::EncryptedSecure));
        let memory = Arc::new(ScriptedStore::new("memory", SecurityTier::MemoryLow));
        encrypted.panic_on_operations(true);
        let facade = facade(&[&encrypted, &memory]);

        for _ in 0..5 {
            assert!(facade.set("k", "v").await);
            assert_eq!(facade.health().active_tier, SecurityTier::MemoryLow);
        }
        assert_eq!(facade.get("k").await.as_deref(), Some("v"));

        assert_eq!(encrypted.attempts(), 3, "demoted after reaching the threshold");
        assert_eq!(facade.orchestrator().active_index().await, 1);
        assert_eq!(facade.orchestrator().failure_counts().await, vec![3, 0]);
        assert!(facade.health().is_healthy);
    }

    #[tokio::test]
    async fn panic_outside_backend_operations_becomes_safe_default() {
        let memory = Arc::new(ScriptedStore::new("memory", SecurityTier::MemoryLow));
        let facade = facade(&[&memory]);
        assert!(facade.set("k", "v").await);

        memory.panic_on_availability(true);
        assert_eq!(facade.get("k").await, None);
        assert!(!facade.set("k", "v2").await);

        let health = facade.health();
        assert!(!health.is_healthy);
        assert!(health
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("panicked")));

        memory.panic_on_availability(false);
        assert_eq!(facade.get("k").await.as_deref(), Some("v"));
        assert!(facade.health().is_healthy);
    }

    #[tokio::test]
    async fn exhaustion_returns_defaults_and_marks_health() {
        let memory = Arc::new(ScriptedStore::new("memory", SecurityTier::MemoryLow));
        let facade = facade(&[&memory]);
        assert!(facade.set("k", "v").await);

        memory.fail_operations(true);
        assert_eq!(facade.get("k").await, None);
        assert!(!facade.set("k", "v").await);
        assert!(!facade.contains("k").await);

        let health = facade.health();
        assert!(!health.is_healthy);
        assert_eq!(health.active_tier, SecurityTier::None);
    }

    #[tokio::test]
    async fn failover_and_health_check_pass_through() {
        let encrypted = Arc::new(ScriptedStore::new("encrypted", SecurityTier::EncryptedSecure));
        let memory = Arc::new(ScriptedStore::new("memory", SecurityTier::MemoryLow));
        let facade = facade(&[&encrypted, &memory]);
        assert!(facade.set("k", "v").await);

        assert_eq!(facade.force_failover().await, Ok(SecurityTier::MemoryLow));
        memory.set_available(false);
        encrypted.set_available(false);
        assert_eq!(facade.force_failover().await, Err(ErrorKind::NoFailoverTarget));

        let snapshot = facade.perform_health_check().await;
        assert_eq!(snapshot, facade.health());
        let infos = facade.list_backend_info().await;
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|info| !info.available));
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() {
        let memory = Arc::new(ScriptedStore::new("memory", SecurityTier::MemoryLow));
        let facade = Arc::new(facade(&[&memory]));

        let mut handles = Vec::new();
        for i in 0..16 {
            let facade = Arc::clone(&facade);
            handles.push(tokio::spawn(async move {
                facade.set(&format!("key/{i}"), &format!("value-{i}")).await
            }));
        }
        for handle in handles {
            assert!(handle.await.expect("join"));
        }

        for i in 0..16 {
            assert_eq!(
                facade.get(&format!("key/{i}")).await,
                Some(format!("value-{i}"))
            );
        }
        assert_eq!(memory.health_probes(), 1);
    }
}
