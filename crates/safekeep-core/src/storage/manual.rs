use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    secure_store::{Lookup, SecureStore, StoreError},
    tier::SecurityTier,
};

/// Request for a human to type the value of `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualEntryRequest {
    pub request_id: String,
    pub key: String,
    pub prompt_hint: String,
}

/// Last-resort backend: values come from a person answering prompts.
///
/// Requests are published on the channel returned by [`ManualEntryStore::new`];
/// the prompt collaborator answers with [`complete`](Self::complete) or
/// [`skip`](Self::skip). Values supplied this way, or written with `set_string`,
/// are cached for the rest of the session.
#[derive(Clone)]
pub struct ManualEntryStore {
    inner: Arc<ManualInner>,
}

struct ManualInner {
    values: Mutex<HashMap<String, String>>,
    pending: Mutex<HashMap<String, PendingSlot>>,
    prompts: mpsc::UnboundedSender<ManualEntryRequest>,
    timeout: Option<Duration>,
}

struct PendingSlot {
    key: String,
    responder: oneshot::Sender<Option<String>>,
}

impl ManualEntryStore {
    /// Create the store and the receiving end of its prompt channel.
    /// `timeout` of `None` waits for the human indefinitely.
    pub fn new(timeout: Option<Duration>) -> (Self, mpsc::UnboundedReceiver<ManualEntryRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Self {
            inner: Arc::new(ManualInner {
                values: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                prompts: tx,
                timeout,
            }),
        };
        (store, rx)
    }

    /// Resolve a pending request with the value the human typed. Returns `false`
    /// when the request is unknown or already resolved.
    pub fn complete(&self, request_id: &str, value: impl Into<String>) -> bool {
        let Some(slot) = self.pending().remove(request_id) else {
            debug!(request_id, "ignoring completion for settled manual entry request");
            return false;
        };
        let value = value.into();
        self.values().insert(slot.key.clone(), value.clone());
        // The waiter may have given up already; the value stays cached either way.
        let _ = slot.responder.send(Some(value));
        info!(request_id, key = %slot.key, "manual entry completed");
        true
    }

    /// Decline a pending request. Returns `false` when the request is unknown or
    /// already resolved.
    pub fn skip(&self, request_id: &str) -> bool {
        let Some(slot) = self.pending().remove(request_id) else {
            return false;
        };
        let _ = slot.responder.send(None);
        info!(request_id, key = %slot.key, "manual entry skipped");
        true
    }

    /// Number of requests still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    fn begin_request(&self, key: &str) -> Result<PendingEntry, StoreError> {
        let request = ManualEntryRequest {
            request_id: Uuid::new_v4().to_string(),
            key: key.to_string(),
            prompt_hint: format!("Enter the value for \"{key}\""),
        };
        let (responder, receiver) = oneshot::channel();
        self.pending().insert(
            request.request_id.clone(),
            PendingSlot {
                key: request.key.clone(),
                responder,
            },
        );

        if self.inner.prompts.send(request.clone()).is_err() {
            self.pending().remove(&request.request_id);
            return Err(StoreError::unavailable("prompt collaborator disconnected"));
        }
        debug!(request_id = %request.request_id, key, "manual entry requested");

        Ok(PendingEntry {
            request,
            receiver,
            store: self.clone(),
            settled: false,
        })
    }

    fn cached(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.try_values()?.get(key).cloned())
    }

    fn try_values(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.inner
            .values
            .lock()
            .map_err(|err| StoreError::storage(format!("lock poisoned: {err}")))
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.inner.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingSlot>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ManualEntryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualEntryStore")
            .field("values", &"[REDACTED]")
            .field("pending", &self.pending_count())
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

#[async_trait]
impl SecureStore for ManualEntryStore {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn tier(&self) -> SecurityTier {
        SecurityTier::ManualEmergency
    }

    fn is_available(&self) -> bool {
        !self.inner.prompts.is_closed()
    }

    /// Suspends until a human answers when the key has not been seen yet.
    #[instrument(skip_all, fields(key))]
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(value) = self.cached(key)? {
            return Ok(Some(value));
        }
        self.begin_request(key)?.wait().await.map(Some)
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.try_values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.try_values()?.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.try_values()?.clear();
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.try_values()?.contains_key(key))
    }

    async fn lookup(&self, key: &str) -> Result<Lookup, StoreError> {
        if let Some(value) = self.cached(key)? {
            return Ok(Lookup::Ready(Some(value)));
        }
        self.begin_request(key).map(Lookup::Deferred)
    }

    /// Nothing external can fail except the prompt channel itself.
    async fn health_check(&self) -> bool {
        self.is_available()
    }
}

/// Handle on an issued manual-entry request. Dropping it before it settles
/// skips the request.
pub struct PendingEntry {
    request: ManualEntryRequest,
    receiver: oneshot::Receiver<Option<String>>,
    store: ManualEntryStore,
    settled: bool,
}

impl PendingEntry {
    pub fn request(&self) -> &ManualEntryRequest {
        &self.request
    }

    /// Wait for the human. Resolves to `ManualEntrySkipped` on skip, on timeout,
    /// or when the store goes away.
    pub async fn wait(mut self) -> Result<String, StoreError> {
        let answer = match self.store.inner.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.receiver).await {
                Ok(answer) => answer,
                Err(_) => {
                    warn!(request_id = %self.request.request_id, "manual entry timed out");
                    return self.expire();
                }
            },
            None => (&mut self.receiver).await,
        };
        self.settled = true;

        match answer {
            Ok(Some(value)) => Ok(value),
            Ok(None) | Err(_) => Err(self.skipped()),
        }
    }

    /// Retire the request after its timeout. An answer that arrived just before
    /// the slot was removed still wins.
    fn expire(&mut self) -> Result<String, StoreError> {
        self.store.skip(&self.request.request_id);
        self.settled = true;
        match self.receiver.try_recv() {
            Ok(Some(value)) => Ok(value),
            _ => Err(self.skipped()),
        }
    }

    fn skipped(&self) -> StoreError {
        StoreError::ManualEntrySkipped {
            key: self.request.key.clone(),
        }
    }
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        if !self.settled {
            self.store.skip(&self.request.request_id);
        }
    }
}

impl fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEntry")
            .field("request", &self.request)
            .field("settled", &self.settled)
            .finish()
    }
}
