use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use dirs::data_dir;
use safekeep_core::{
    storage::{InMemoryStore, ManualEntryRequest, ManualEntryStore},
    RobustFacade, SecureStore, StorageOrchestrator, StorageSettings,
};
use safekeep_storage::{
    key_provider::{KeyProvider, KeyringProvider},
    EncryptedFileStore, ObfuscatedFileStore,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::config::Config;

/// Facade over the full tier stack plus the handles the prompt responder needs.
pub struct Storage {
    pub facade: RobustFacade,
    pub manual: ManualEntryStore,
    pub prompts: UnboundedReceiver<ManualEntryRequest>,
}

/// Resolve the default data directory for Safekeep.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("safekeep"))
}

/// Build the production stack: OS keychain encryption, obfuscated files,
/// memory, then manual entry.
pub fn storage_from_config(config: &Config) -> Result<Storage> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "initializing storage tiers");
    let provider = KeyringProvider::new(&config.keyring.service, &config.keyring.account);
    assemble(root, provider, &config.storage)
}

pub fn assemble<P: KeyProvider + 'static>(
    root: PathBuf,
    provider: P,
    settings: &StorageSettings,
) -> Result<Storage> {
    let memory = InMemoryStore::with_capacity(settings.memory_capacity_bytes);
    memory.set_session_cache_enabled(settings.session_cache)?;
    let (manual, prompts) = ManualEntryStore::new(settings.manual_entry_timeout());

    let backends: Vec<Arc<dyn SecureStore>> = vec![
        Arc::new(EncryptedFileStore::new(root.join("encrypted"), provider)),
        Arc::new(ObfuscatedFileStore::new(root.join("obfuscated"))),
        Arc::new(memory),
        Arc::new(manual.clone()),
    ];
    let orchestrator = StorageOrchestrator::new(backends, settings.orchestrator());

    Ok(Storage {
        facade: RobustFacade::new(Arc::new(orchestrator)),
        manual,
        prompts,
    })
}

#[cfg(test)]
mod tests {
    use safekeep_core::SecurityTier;
    use safekeep_storage::key_provider::InMemoryKeyProvider;

    use super::*;

    #[tokio::test]
    async fn stack_prefers_encrypted_tier() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = assemble(
            dir.path().to_path_buf(),
            InMemoryKeyProvider::default(),
            &StorageSettings::default(),
        )
        .expect("assemble");

        assert!(storage.facade.set("api/token", "s3cret").await);
        assert_eq!(storage.facade.health().active_tier, SecurityTier::EncryptedSecure);
        assert_eq!(
            storage.facade.get("api/token").await.as_deref(),
            Some("s3cret")
        );

        let tiers: Vec<_> = storage
            .facade
            .list_backend_info()
            .await
            .into_iter()
            .map(|info| info.tier)
            .collect();
        assert_eq!(
            tiers,
            vec![
                SecurityTier::EncryptedSecure,
                SecurityTier::ObfuscatedMedium,
                SecurityTier::MemoryLow,
                SecurityTier::ManualEmergency,
            ]
        );
    }

    #[tokio::test]
    async fn missing_keychain_falls_back_to_obfuscated_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = InMemoryKeyProvider::default();
        provider.set_available(false);
        let storage = assemble(
            dir.path().to_path_buf(),
            provider,
            &StorageSettings::default(),
        )
        .expect("assemble");

        assert!(storage.facade.set("k", "v").await);
        assert_eq!(
            storage.facade.health().active_tier,
            SecurityTier::ObfuscatedMedium
        );
        assert!(dir.path().join("obfuscated").is_dir());
    }
}
