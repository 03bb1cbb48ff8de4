use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::SecurityTier;

/// Point-in-time summary of orchestrator status. Published by value; holders
/// never observe later mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub active_tier: SecurityTier,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl HealthSnapshot {
    /// State before any backend has been selected.
    pub fn initial() -> Self {
        Self {
            is_healthy: false,
            active_tier: SecurityTier::None,
            last_success_at: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    pub(crate) fn succeeded(&self, tier: SecurityTier) -> Self {
        Self {
            is_healthy: tier != SecurityTier::None,
            active_tier: tier,
            last_success_at: Some(Utc::now()),
            consecutive_failures: 0,
            last_error: self.last_error.clone(),
        }
    }

    /// A backend was chosen by a probe rather than by a served request.
    pub(crate) fn selected(&self, tier: SecurityTier) -> Self {
        Self {
            is_healthy: tier != SecurityTier::None,
            active_tier: tier,
            consecutive_failures: 0,
            ..self.clone()
        }
    }

    /// An unexpected fault escaped a backend; keep the tier but flag it.
    pub(crate) fn faulted(&self, error: String) -> Self {
        Self {
            is_healthy: false,
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            last_error: Some(error),
            ..self.clone()
        }
    }

    /// Record a failed attempt without changing the serving tier.
    pub(crate) fn failed_attempt(&self, error: String) -> Self {
        Self {
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            last_error: Some(error),
            ..self.clone()
        }
    }

    /// No backend can serve requests.
    pub(crate) fn exhausted(&self, error: Option<String>) -> Self {
        Self {
            is_healthy: false,
            active_tier: SecurityTier::None,
            last_error: error.or_else(|| self.last_error.clone()),
            ..self.clone()
        }
    }
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}

/// Diagnostics row describing one configured backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    pub tier: SecurityTier,
    pub available: bool,
    pub passes_health_check: bool,
    pub failure_count: u32,
    pub active: bool,
}
