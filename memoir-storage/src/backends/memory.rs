//! In-process blob store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use memoir_core::StorageError;

use crate::traits::{validate_path, BlobStore};

/// Blob store held in memory. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs stored.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let blobs = self.blobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(blobs.get(path).cloned())
    }

    fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_path(path)?;
        let mut blobs = self.blobs.write().map_err(|_| StorageError::LockPoisoned)?;
        blobs.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let mut blobs = self.blobs.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(blobs.remove(path).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let blobs = self.blobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect())
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let blobs = self.blobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(blobs.contains_key(path))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        validate_path(to)?;
        let mut blobs = self.blobs.write().map_err(|_| StorageError::LockPoisoned)?;
        let bytes = blobs.remove(from).ok_or_else(|| StorageError::NotFound {
            path: from.to_string(),
        })?;
        blobs.insert(to.to_string(), bytes);
        Ok(())
    }
}
