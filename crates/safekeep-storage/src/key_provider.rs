use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;

/// The data key that seals the encrypted tier. Only `id` may appear in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub id: String,
    /// AES-256 key.
    pub bytes: [u8; 32],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Source of the data key for [`crate::EncryptedFileStore`].
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Return the data key, minting and persisting one on first use.
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;

    /// Whether the underlying keystore can be reached at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// Keeps the data key in the OS keychain under `service`/`account`.
///
/// The key is read once and then served from memory, so a keychain that
/// forgets entries between handles cannot rotate the key under existing blobs.
pub struct KeyringProvider {
    service: String,
    account: String,
    cached: Mutex<Option<KeyMaterial>>,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
            cached: Mutex::new(None),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|err| KeyError::Keyring(err.to_string()))
    }

    fn load_or_mint(&self) -> Result<KeyMaterial, KeyError> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(secret) => decode_key(&secret),
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, "creating data key in keyring");
                let material = generate_key();
                entry
                    .set_password(&encode_key(&material))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                Ok(material)
            }
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;
        if let Some(existing) = cached.as_ref() {
            return Ok(existing.clone());
        }

        let material = self.load_or_mint()?;
        *cached = Some(material.clone());
        Ok(material)
    }

    fn is_available(&self) -> bool {
        if self.cached.lock().is_ok_and(|cached| cached.is_some()) {
            return true;
        }
        match self.entry() {
            Ok(entry) => {
                let reachable = keystore_reachable(&entry.get_password());
                if !reachable {
                    debug!(service = %self.service, "keychain is not reachable");
                }
                reachable
            }
            Err(_) => false,
        }
    }
}

/// A missing entry still means the keychain answered; only access and
/// platform failures make it unusable.
fn keystore_reachable(lookup: &Result<String, keyring::Error>) -> bool {
    !matches!(
        lookup,
        Err(keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_))
    )
}

/// Holds the data key in process memory; it dies with the process.
#[derive(Debug, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryKeyProvider {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl InMemoryKeyProvider {
    /// Simulate the keystore disappearing (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        if !self.is_available() {
            return Err(KeyError::Keyring("keystore unavailable".to_string()));
        }
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = generate_key();
        *guard = Some(material.clone());
        Ok(material)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

fn generate_key() -> KeyMaterial {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial {
        id: "default".to_string(),
        bytes,
    }
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|raw: Vec<u8>| KeyError::Decode(format!("expected 32 bytes, got {}", raw.len())))?;

    Ok(KeyMaterial {
        id: "default".to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_provider_returns_same_key() {
        let provider = InMemoryKeyProvider::default();
        let first = provider.get_or_create().await.unwrap();
        let second = provider.get_or_create().await.unwrap();

        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn unavailable_memory_provider_refuses_keys() {
        let provider = InMemoryKeyProvider::default();
        provider.set_available(false);

        assert!(!provider.is_available());
        let err = provider.get_or_create().await.expect_err("unavailable");
        assert!(matches!(err, KeyError::Keyring(_)));
    }

    #[tokio::test]
    async fn keyring_provider_reuses_its_key() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let provider = KeyringProvider::new("safekeep-test", "data-key");

        let first = provider.get_or_create().await.expect("first key");
        let second = provider.get_or_create().await.expect("second key");

        assert_eq!(first.bytes, second.bytes);
        assert!(provider.is_available());
    }

    #[test]
    fn keychain_failures_mark_provider_unavailable() {
        assert!(keystore_reachable(&Ok("c2VjcmV0".to_string())));
        assert!(keystore_reachable(&Err(keyring::Error::NoEntry)));
        assert!(!keystore_reachable(&Err(keyring::Error::NoStorageAccess(
            Box::new(std::io::Error::other("locked"))
        ))));
        assert!(!keystore_reachable(&Err(keyring::Error::PlatformFailure(
            Box::new(std::io::Error::other("no session bus"))
        ))));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_key("abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode(_)));
    }

    #[test]
    fn encoded_key_decodes_to_same_bytes() {
        let material = generate_key();
        let decoded = decode_key(&encode_key(&material)).expect("decode");
        assert_eq!(decoded, material);
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let material = generate_key();
        assert!(format!("{material:?}").contains("REDACTED"));
    }
}
