//! Secure storage contract and the backends that need no platform support.

pub mod manual;
pub mod memory;
pub mod secure_store;
pub mod tier;

pub use manual::{ManualEntryRequest, ManualEntryStore, PendingEntry};
pub use memory::InMemoryStore;
pub use secure_store::{Lookup, SecureStore, StoreError, HEALTH_PROBE_KEY};
pub use tier::SecurityTier;
