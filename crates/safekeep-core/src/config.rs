use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::memory::DEFAULT_CAPACITY_BYTES;

/// Tunables for failover, as they appear in the `[storage]` section of the
/// user config. Missing fields fall back to defaults.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageSettings {
    /// Consecutive failures on the active backend before it is demoted.
    pub failure_threshold: u32,
    /// Minimum spacing between real health checks.
    pub health_check_interval_secs: u64,
    /// Byte ceiling for the in-memory tier.
    pub memory_capacity_bytes: usize,
    /// Keep evicted memory entries readable for the session.
    pub session_cache: bool,
    /// Give up on a manual-entry prompt after this long. Unset waits forever.
    pub manual_entry_timeout_secs: Option<u64>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            health_check_interval_secs: 30,
            memory_capacity_bytes: DEFAULT_CAPACITY_BYTES,
            session_cache: true,
            manual_entry_timeout_secs: None,
        }
    }
}

impl StorageSettings {
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            failure_threshold: self.failure_threshold.max(1),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
        }
    }

    pub fn manual_entry_timeout(&self) -> Option<Duration> {
        self.manual_entry_timeout_secs.map(Duration::from_secs)
    }
}

/// Runtime parameters of the `StorageOrchestrator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub failure_threshold: u32,
    pub health_check_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        StorageSettings::default().orchestrator()
    }
}
