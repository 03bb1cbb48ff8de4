//! One-file-per-key layout shared by the file-backed stores.

use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use safekeep_core::StoreError;
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

/// Extension of every entry file, so `clear` leaves foreign files alone.
const BLOB_EXTENSION: &str = "blob";

#[derive(Debug, Clone)]
pub(crate) struct BlobDir {
    root: PathBuf,
}

impl BlobDir {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{BLOB_EXTENSION}", sanitize_key(key)))
    }

    /// Atomically replace the entry for `key`.
    pub(crate) fn write<T: Serialize>(&self, key: &str, blob: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(storage_err)?;

        let mut tmp = NamedTempFile::new_in(&self.root).map_err(storage_err)?;
        let json = serde_json::to_vec(blob).map_err(storage_err)?;
        tmp.write_all(&json).map_err(storage_err)?;
        tmp.flush().map_err(storage_err)?;
        tmp.persist(self.path_for(key)).map_err(|e| storage_err(e.error))?;
        Ok(())
    }

    pub(crate) fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut file = match File::open(self.path_for(key)) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(storage_err(err)),
        };

        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(storage_err)?;
        serde_json::from_slice(&buf).map(Some).map_err(storage_err)
    }

    pub(crate) fn remove(&self, key: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(storage_err(err)),
        }
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    pub(crate) fn clear(&self) -> Result<(), StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(storage_err(err)),
        };

        for entry in entries {
            let path = entry.map_err(storage_err)?.path();
            let is_blob = path.extension().is_some_and(|ext| ext == BLOB_EXTENSION);
            if is_blob && path.is_file() {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(storage_err(err)),
                }
            }
        }
        Ok(())
    }
}

fn sanitize_key(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

pub(crate) fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::storage(err)
}
