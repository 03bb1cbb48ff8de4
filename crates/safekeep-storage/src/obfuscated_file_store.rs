use std::path::PathBuf;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use safekeep_core::{SecureStore, SecurityTier, StoreError};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::blob::{storage_err, BlobDir};

const MASK_BYTE: u8 = 0xA5;
const SALT_LEN: usize = 16;

/// File store for hosts without a usable keystore. Values are masked with a
/// per-entry salt so plaintext never lands on disk, but anyone holding the file
/// can recover it. Not encryption.
#[derive(Debug, Clone)]
pub struct ObfuscatedFileStore {
    dir: BlobDir,
}

impl ObfuscatedFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            dir: BlobDir::new(root),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MaskedBlob {
    salt: String,
    payload: String,
}

#[async_trait]
impl SecureStore for ObfuscatedFileStore {
    fn name(&self) -> &'static str {
        "obfuscated-file"
    }

    fn tier(&self) -> SecurityTier {
        SecurityTier::ObfuscatedMedium
    }

    #[instrument(skip_all)]
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(blob) = self.dir.read::<MaskedBlob>(key)? else {
            return Ok(None);
        };
        let salt = general_purpose::STANDARD
            .decode(blob.salt)
            .map_err(|e| StoreError::storage(format!("salt decode failed: {e}")))?;
        if salt.is_empty() {
            return Err(StoreError::storage("stored salt is empty"));
        }
        let mut bytes = general_purpose::STANDARD
            .decode(blob.payload)
            .map_err(|e| StoreError::storage(format!("payload decode failed: {e}")))?;
        mask(&mut bytes, &salt);
        String::from_utf8(bytes).map(Some).map_err(storage_err)
    }

    #[instrument(skip_all)]
    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut bytes = value.as_bytes().to_vec();
        mask(&mut bytes, &salt);

        let blob = MaskedBlob {
            salt: general_purpose::STANDARD.encode(salt),
            payload: general_purpose::STANDARD.encode(bytes),
        };
        self.dir.write(key, &blob)
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.dir.remove(key)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.dir.clear()
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.dir.contains(key))
    }
}

/// XOR is its own inverse, so the same call masks and unmasks.
fn mask(bytes: &mut [u8], salt: &[u8]) {
    for (byte, salt_byte) in bytes.iter_mut().zip(salt.iter().cycle()) {
        *byte ^= salt_byte ^ MASK_BYTE;
    }
}
