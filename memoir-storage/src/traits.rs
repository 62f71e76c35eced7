//! Blob store trait.
//!
//! A blob store maps `/`-separated relative paths to byte strings. It knows
//! nothing about keys, roles or envelopes; [`StorageAdapter`](crate::StorageAdapter)
//! builds the artifact layout on top of it.

use memoir_core::StorageError;

/// Pluggable byte storage.
///
/// Implementations must be safe to share between threads. `put` must be
/// atomic from a reader's point of view: a concurrent `get` observes either
/// the previous bytes or the new ones, never a mix.
///
/// Remote object stores fit behind this trait by mapping paths to object
/// names.
pub trait BlobStore: Send + Sync {
    /// Short name used in logs and errors.
    fn backend_name(&self) -> &'static str;

    /// Read a blob. `Ok(None)` when it does not exist.
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a blob, replacing any existing one atomically.
    fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Remove a blob. Returns whether it existed.
    fn delete(&self, path: &str) -> Result<bool, StorageError>;

    /// Every path starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.get(path)?.is_some())
    }

    /// Move a blob. The default copies then deletes; backends with a native
    /// rename override it.
    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let bytes = self.get(from)?.ok_or_else(|| StorageError::NotFound {
            path: from.to_string(),
        })?;
        self.put(to, &bytes)?;
        self.delete(from)?;
        Ok(())
    }

    /// Remove every blob under `prefix`. Returns how many were removed.
    fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let mut deleted = 0;
        for path in self.list(prefix)? {
            if self.delete(&path)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Reject paths that could escape the store root.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.starts_with('/') {
        return Err(invalid("path must be relative"));
    }
    if path.contains('\\') {
        return Err(invalid("path must use / separators"));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid("segments must be non-empty and not . or .."));
        }
    }
    Ok(())
}
