use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{
    secure_store::{SecureStore, StoreError, HEALTH_PROBE_KEY},
    tier::SecurityTier,
};

/// Default ceiling for combined key and value bytes (1 MiB).
pub const DEFAULT_CAPACITY_BYTES: usize = 1024 * 1024;

/// Emergency backend that keeps secrets in process memory only.
///
/// The primary table is bounded by `capacity` bytes of key+value data. Writes that
/// do not fit evict the oldest entries first; evicted entries move to a session
/// cache (same bound) that reads fall back to until it is switched off.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<MemoryState>>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    primary: BoundedTable,
    session: BoundedTable,
    session_enabled: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryState {
                session_enabled: true,
                ..MemoryState::default()
            })),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held by the primary table.
    pub fn used_bytes(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.primary.used)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.primary.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Toggle the session cache. Disabling it drops every entry it holds.
    pub fn set_session_cache_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.session_enabled = enabled;
        if !enabled {
            state.session.clear();
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.inner
            .lock()
            .map_err(|err| StoreError::storage(format!("lock poisoned: {err}")))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn tier(&self) -> SecurityTier {
        SecurityTier::MemoryLow
    }

    #[instrument(skip_all, fields(key))]
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let state = self.lock()?;
        if let Some(value) = state.primary.get(key) {
            return Ok(Some(value.clone()));
        }
        if state.session_enabled {
            return Ok(state.session.get(key).cloned());
        }
        Ok(None)
    }

    #[instrument(skip_all, fields(key))]
    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let evicted = state.primary.insert(key, value, self.capacity)?;
        state.session.remove(key);

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted oldest entries from memory tier");
            if state.session_enabled {
                for (old_key, old_value) in evicted {
                    // Entries already fit the primary table, so they fit the session cache.
                    let _ = state.session.insert(&old_key, &old_value, self.capacity);
                }
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(key))]
    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let primary = state.primary.remove(key).is_some();
        let session = state.session.remove(key).is_some();
        Ok(primary || session)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.primary.clear();
        state.session.clear();
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let state = self.lock()?;
        Ok(state.primary.get(key).is_some()
            || (state.session_enabled && state.session.get(key).is_some()))
    }

    /// Alive as long as the lock is usable. The sentinel is only written when it
    /// fits without evicting real entries.
    async fn health_check(&self) -> bool {
        let Ok(mut state) = self.lock() else {
            return false;
        };
        let payload = "ok";
        if state.primary.used + entry_size(HEALTH_PROBE_KEY, payload) > self.capacity {
            return true;
        }
        if state
            .primary
            .insert(HEALTH_PROBE_KEY, payload, self.capacity)
            .is_err()
        {
            return false;
        }
        let round_trip = state.primary.get(HEALTH_PROBE_KEY).map(String::as_str) == Some(payload);
        state.primary.remove(HEALTH_PROBE_KEY);
        round_trip
    }
}

/// Key/value table bounded by byte size, evicting in insertion order.
#[derive(Debug, Default)]
struct BoundedTable {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
    used: usize,
}

impl BoundedTable {
    fn get(&self, key: &str) -> Option<&String> {
        self.entries.get(key)
    }

    /// Insert an entry, evicting the oldest ones until it fits. Overwriting a key
    /// moves it to the back of the eviction order. Returns the evicted entries.
    fn insert(
        &mut self,
        key: &str,
        value: &str,
        capacity: usize,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let size = entry_size(key, value);
        if size > capacity {
            return Err(StoreError::CapacityExceeded {
                requested: size,
                capacity,
            });
        }

        self.remove(key);
        let mut evicted = Vec::new();
        while self.used + size > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(old_value) = self.entries.remove(&oldest) {
                self.used -= entry_size(&oldest, &old_value);
                evicted.push((oldest, old_value));
            }
        }

        self.entries.insert(key.to_string(), value.to_string());
        self.order.push_back(key.to_string());
        self.used += size;
        Ok(evicted)
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        let value = self.entries.remove(key)?;
        self.used -= entry_size(key, &value);
        self.order.retain(|k| k != key);
        Some(value)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.used = 0;
    }
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}
