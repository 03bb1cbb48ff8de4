use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::{manual::PendingEntry, tier::SecurityTier};

/// Key used by the default health probe. Normal callers never see it.
pub const HEALTH_PROBE_KEY: &str = "__safekeep_health_probe__";

/// Errors produced by secure storage backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend cannot serve requests right now (missing keystore, closed channel).
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },
    /// Underlying storage failure (I/O, crypto, poisoned lock).
    #[error("storage failure: {reason}")]
    Storage { reason: String },
    /// The write does not fit even after eviction.
    #[error("capacity exceeded: {requested} bytes requested, capacity is {capacity} bytes")]
    CapacityExceeded { requested: usize, capacity: usize },
    /// A human declined to provide the value.
    #[error("manual entry skipped for key: {key}")]
    ManualEntrySkipped { key: String },
}

impl StoreError {
    pub fn storage(reason: impl ToString) -> Self {
        StoreError::Storage {
            reason: reason.to_string(),
        }
    }

    pub fn unavailable(reason: impl ToString) -> Self {
        StoreError::Unavailable {
            reason: reason.to_string(),
        }
    }
}

/// Result of an orchestrator-facing read.
#[derive(Debug)]
pub enum Lookup {
    /// The backend answered immediately.
    Ready(Option<String>),
    /// The answer depends on an outside party; await the entry without holding locks.
    Deferred(PendingEntry),
}

/// Uniform contract for every credential backend, from the platform keystore down
/// to manual entry. Implementations report failures through `StoreError` and must
/// never panic on bad input.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Short name used for logging and diagnostics.
    fn name(&self) -> &'static str;

    /// Security class of this backend. Fixed for the lifetime of the instance.
    fn tier(&self) -> SecurityTier;

    /// Runtime capability detection (keystore present, prompt channel open).
    fn is_available(&self) -> bool {
        true
    }

    /// Read a value. `Ok(None)` means the key is absent, which is not a failure.
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Persist a value under a key, overwriting any existing entry.
    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key (idempotent). Returns whether an entry existed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove every entry held by this backend.
    async fn clear(&self) -> Result<(), StoreError>;

    async fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Read variant used by the orchestrator. Backends that would suspend for a
    /// long time return `Lookup::Deferred` instead of blocking.
    async fn lookup(&self, key: &str) -> Result<Lookup, StoreError> {
        self.get_string(key).await.map(Lookup::Ready)
    }

    /// Cheap self-test: write a sentinel, read it back, compare, clean up.
    async fn health_check(&self) -> bool {
        let payload = format!("ok:{}", self.name());
        if let Err(err) = self.set_string(HEALTH_PROBE_KEY, &payload).await {
            debug!(backend = self.name(), %err, "health probe write failed");
            return false;
        }
        let round_trip = self.get_string(HEALTH_PROBE_KEY).await;
        let cleaned = self.remove(HEALTH_PROBE_KEY).await.is_ok();

        match round_trip {
            Ok(Some(value)) => value == payload && cleaned,
            Ok(None) => false,
            Err(err) => {
                debug!(backend = self.name(), %err, "health probe read failed");
                false
            }
        }
    }
}
