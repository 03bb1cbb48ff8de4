//! Core of Safekeep: the secure storage contract, the emergency backends, and the
//! orchestrator that ranks and fails over between them.
//! Platform-specific backends live in `safekeep-storage`.

pub mod config;
pub mod facade;
pub mod health;
pub mod orchestrator;
pub mod outcome;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{OrchestratorConfig, StorageSettings};
pub use facade::{InitState, RobustFacade};
pub use health::{BackendInfo, HealthSnapshot};
pub use orchestrator::{OrchestratorPhase, StorageOrchestrator};
pub use outcome::{ErrorKind, OperationOutcome};
pub use storage::{SecureStore, SecurityTier, StoreError};
