//! Scriptable backend for exercising failover paths.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::storage::{SecureStore, SecurityTier, StoreError, HEALTH_PROBE_KEY};

/// Backend whose failures are toggled by the test. Operations on the health probe
/// key follow `fail_health`; every other key follows `fail_operations`.
pub struct ScriptedStore {
    name: &'static str,
    tier: SecurityTier,
    available: AtomicBool,
    fail_ops: AtomicBool,
    fail_probe: AtomicBool,
    panic_ops: AtomicBool,
    panic_availability: AtomicBool,
    panic_health_check: AtomicBool,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
    probes: AtomicUsize,
    values: Mutex<HashMap<String, String>>,
}

impl ScriptedStore {
    pub fn new(name: &'static str, tier: SecurityTier) -> Self {
        Self {
            name,
            tier,
            available: AtomicBool::new(true),
            fail_ops: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            panic_ops: AtomicBool::new(false),
            panic_availability: AtomicBool::new(false),
            panic_health_check: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_operations(&self, fail: bool) {
        self.fail_ops.store(fail, Ordering::SeqCst);
    }

    pub fn fail_health(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    /// Fail both data operations and the health probe.
    pub fn fail_everything(&self, fail: bool) {
        self.fail_operations(fail);
        self.fail_health(fail);
    }

    /// Fail the next `count` data operations, then behave normally.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn panic_on_operations(&self, panic: bool) {
        self.panic_ops.store(panic, Ordering::SeqCst);
    }

    /// Panic from `is_available`, outside any single backend operation.
    pub fn panic_on_availability(&self, panic: bool) {
        self.panic_availability.store(panic, Ordering::SeqCst);
    }

    pub fn panic_on_health_check(&self, panic: bool) {
        self.panic_health_check.store(panic, Ordering::SeqCst);
    }

    /// Number of data operations attempted (health probes excluded).
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of health probe writes.
    pub fn health_probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        if key == HEALTH_PROBE_KEY {
            if self.panic_health_check.load(Ordering::SeqCst) {
                panic!("scripted health check panic");
            }
            if self.fail_probe.load(Ordering::SeqCst) {
                return Err(StoreError::storage("scripted probe failure"));
            }
            return Ok(());
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.panic_ops.load(Ordering::SeqCst) {
            panic!("scripted backend panic");
        }
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(StoreError::storage("scripted failure"));
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::storage("scripted transient failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl SecureStore for ScriptedStore {
    fn name(&self) -> &'static str {
        self.name
    }

    fn tier(&self) -> SecurityTier {
        self.tier
    }

    fn is_available(&self) -> bool {
        if self.panic_availability.load(Ordering::SeqCst) {
            panic!("scripted availability panic");
        }
        self.available.load(Ordering::SeqCst)
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check(key)?;
        Ok(self.values.lock().expect("lock").get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if key == HEALTH_PROBE_KEY {
            self.probes.fetch_add(1, Ordering::SeqCst);
        }
        self.check(key)?;
        self.values
            .lock()
            .expect("lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.check(key)?;
        Ok(self.values.lock().expect("lock").remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.check("")?;
        self.values.lock().expect("lock").clear();
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        self.check(key)?;
        Ok(self.values.lock().expect("lock").contains_key(key))
    }
}
