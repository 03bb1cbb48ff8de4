use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{SecurityTier, StoreError};

/// Orchestrator-level error classification reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ErrorKind {
    #[error("backend unavailable")]
    BackendUnavailable,
    #[error("operation failed: {0}")]
    OperationFailed(String),
    #[error("capacity exceeded")]
    CapacityExceeded,
    #[error("all storage backends exhausted")]
    AllBackendsExhausted,
    #[error("manual entry skipped")]
    ManualEntrySkipped,
    /// Forced failover found no other viable backend; nothing changed.
    #[error("no other healthy backend to fail over to")]
    NoFailoverTarget,
}

impl From<&StoreError> for ErrorKind {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::Unavailable { .. } => ErrorKind::BackendUnavailable,
            StoreError::Storage { reason } => ErrorKind::OperationFailed(reason.clone()),
            StoreError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            StoreError::ManualEntrySkipped { .. } => ErrorKind::ManualEntrySkipped,
        }
    }
}

impl From<StoreError> for ErrorKind {
    fn from(err: StoreError) -> Self {
        ErrorKind::from(&err)
    }
}

/// Result of an orchestrated operation, tagged with the tier that produced it.
/// Failures are values; nothing on this path panics or unwinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome<T> {
    Success { value: T, tier: SecurityTier },
    Failure { error: ErrorKind, tier: SecurityTier },
}

impl<T> OperationOutcome<T> {
    pub fn success(value: T, tier: SecurityTier) -> Self {
        OperationOutcome::Success { value, tier }
    }

    pub fn failure(error: ErrorKind, tier: SecurityTier) -> Self {
        OperationOutcome::Failure { error, tier }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success { .. })
    }

    pub fn tier(&self) -> SecurityTier {
        match self {
            OperationOutcome::Success { tier, .. } | OperationOutcome::Failure { tier, .. } => {
                *tier
            }
        }
    }

    /// The value on success, `None` on failure.
    pub fn ok(self) -> Option<T> {
        match self {
            OperationOutcome::Success { value, .. } => Some(value),
            OperationOutcome::Failure { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<T, ErrorKind> {
        match self {
            OperationOutcome::Success { value, .. } => Ok(value),
            OperationOutcome::Failure { error, .. } => Err(error),
        }
    }
}
