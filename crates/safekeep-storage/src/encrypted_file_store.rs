use std::path::PathBuf;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use safekeep_core::{SecureStore, SecurityTier, StoreError};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    blob::{storage_err, BlobDir},
    key_provider::{KeyMaterial, KeyProvider},
};

/// AES-GCM encrypted file-backed store. The data key lives in a `KeyProvider`
/// (OS keyring in production); only ciphertext reaches the disk.
pub struct EncryptedFileStore<P: KeyProvider> {
    dir: BlobDir,
    key_provider: P,
}

impl<P: KeyProvider> EncryptedFileStore<P> {
    pub fn new(root: impl Into<PathBuf>, key_provider: P) -> Self {
        Self {
            dir: BlobDir::new(root),
            key_provider,
        }
    }

    async fn cipher(&self) -> Result<Aes256Gcm, StoreError> {
        if !self.key_provider.is_available() {
            return Err(StoreError::unavailable("keystore not reachable"));
        }
        let material = self
            .key_provider
            .get_or_create()
            .await
            .map_err(|e| StoreError::unavailable(format!("key provider: {e}")))?;
        build_cipher(&material)
    }
}

impl<P: KeyProvider> std::fmt::Debug for EncryptedFileStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("root", &self.dir.root())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBlob {
    nonce: String,
    ciphertext: String,
}

#[async_trait]
impl<P: KeyProvider> SecureStore for EncryptedFileStore<P> {
    fn name(&self) -> &'static str {
        "encrypted-file"
    }

    fn tier(&self) -> SecurityTier {
        SecurityTier::EncryptedSecure
    }

    fn is_available(&self) -> bool {
        self.key_provider.is_available()
    }

    #[instrument(skip_all)]
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(blob) = self.dir.read::<StoredBlob>(key)? else {
            return Ok(None);
        };
        let cipher = self.cipher().await?;

        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(blob.nonce)
            .map_err(|e| StoreError::storage(format!("nonce decode failed: {e}")))?;
        if nonce_bytes.len() != 12 {
            return Err(StoreError::storage("stored nonce has the wrong length"));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = URL_SAFE_NO_PAD
            .decode(blob.ciphertext)
            .map_err(|e| StoreError::storage(format!("ciphertext decode failed: {e}")))?;

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| StoreError::storage(format!("decrypt failed: {e}")))?;
        String::from_utf8(plaintext).map(Some).map_err(storage_err)
    }

    #[instrument(skip_all)]
    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let cipher = self.cipher().await?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, value.as_bytes())
            .map_err(|e| StoreError::storage(format!("encrypt failed: {e}")))?;

        let blob = StoredBlob {
            nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        };
        self.dir.write(key, &blob)
    }

    #[instrument(skip_all)]
    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.dir.remove(key)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.dir.clear()
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        if !self.is_available() {
            return Err(StoreError::unavailable("keystore not reachable"));
        }
        Ok(self.dir.contains(key))
    }
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, StoreError> {
    Aes256Gcm::new_from_slice(&material.bytes)
        .map_err(|e| StoreError::storage(format!("cipher init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::InMemoryKeyProvider;

    #[tokio::test]
    async fn round_trip_encrypts_and_decrypts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedFileStore::new(dir.path(), InMemoryKeyProvider::default());

        let key = "workspace/session";
        store.set_string(key, "hello-safekeep").await.expect("set");
        let decrypted = store.get_string(key).await.expect("get");
        assert_eq!(decrypted.as_deref(), Some("hello-safekeep"));

        let stored = std::fs::read_to_string(store.dir.path_for(key)).expect("read ciphertext");
        assert!(
            !stored.contains("hello-safekeep"),
            "plaintext must not be stored"
        );
    }

    #[tokio::test]
    async fn missing_key_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedFileStore::new(dir.path(), InMemoryKeyProvider::default());

        assert_eq!(store.get_string("nope").await.expect("get"), None);
        assert!(!store.contains("nope").await.expect("contains"));
    }

    #[tokio::test]
    async fn remove_reports_whether_entry_existed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedFileStore::new(dir.path(), InMemoryKeyProvider::default());

        store.set_string("k", "v").await.expect("set");
        assert!(store.remove("k").await.expect("first remove"));
        assert!(!store.remove("k").await.expect("second remove"));
        assert!(!store.contains("k").await.expect("contains"));
    }

    #[tokio::test]
    async fn clear_drops_every_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedFileStore::new(dir.path(), InMemoryKeyProvider::default());
        store.set_string("a", "1").await.expect("set a");
        store.set_string("b", "2").await.expect("set b");

        store.clear().await.expect("clear");

        assert_eq!(store.get_string("a").await.expect("get a"), None);
        assert_eq!(store.get_string("b").await.expect("get b"), None);
    }

    #[tokio::test]
    async fn missing_keystore_makes_store_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = InMemoryKeyProvider::default();
        let store = EncryptedFileStore::new(dir.path(), provider.clone());
        store.set_string("k", "v").await.expect("set");

        provider.set_available(false);
        assert!(!store.is_available());
        let err = store.set_string("k", "v2").await.expect_err("no keystore");
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(!store.health_check().await);

        provider.set_available(true);
        assert!(store.health_check().await);
        assert_eq!(store.get_string("k").await.expect("get").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_to_decrypt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedFileStore::new(dir.path(), InMemoryKeyProvider::default());
        store.set_string("k", "v").await.expect("set");

        let path = store.dir.path_for("k");
        let mut blob: StoredBlob =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("parse");
        blob.ciphertext = URL_SAFE_NO_PAD.encode(b"definitely not ciphertext");
        std::fs::write(&path, serde_json::to_vec(&blob).expect("encode")).expect("write");

        let err = store.get_string("k").await.expect_err("tampered");
        assert!(matches!(err, StoreError::Storage { .. }));
    }
}
