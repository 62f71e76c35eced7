//! Storage adapter: artifact layout over a blob store.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use memoir_core::{ArtifactRole, CacheKey, Envelope, StorageError, WriteMode};
use tracing::trace;

use crate::address::{ArtifactAddress, EntryAddress, FunctionAddress};
use crate::traits::BlobStore;

/// Reads, writes, archives and lists artifacts.
///
/// The adapter moves opaque bytes; decoding envelopes is the caller's job,
/// with one exception: when archiving it peeks at the header of the
/// artifact being displaced to stamp the archive with its write time.
#[derive(Clone)]
pub struct StorageAdapter {
    store: Arc<dyn BlobStore>,
}

impl StorageAdapter {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Whether a current artifact of `role` exists.
    pub fn exists(&self, entry: &EntryAddress, role: ArtifactRole) -> Result<bool, StorageError> {
        self.store.exists(&entry.current(role).path())
    }

    /// Read one artifact. `Ok(None)` when it does not exist.
    pub fn read(&self, address: &ArtifactAddress) -> Result<Option<Vec<u8>>, StorageError> {
        self.store.get(&address.path())
    }

    /// Read the current artifact of `role`.
    pub fn read_current(
        &self,
        entry: &EntryAddress,
        role: ArtifactRole,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.read(&entry.current(role))
    }

    /// Write the current artifact of `role`.
    ///
    /// In [`WriteMode::Append`] an existing artifact is first moved aside to
    /// `{role}.{stamp}`; in [`WriteMode::Overwrite`] it is replaced.
    pub fn write(
        &self,
        entry: &EntryAddress,
        role: ArtifactRole,
        bytes: &[u8],
        mode: WriteMode,
    ) -> Result<(), StorageError> {
        let current = entry.current(role);
        if mode == WriteMode::Append {
            if let Some(existing) = self.store.get(&current.path())? {
                let written_at = Envelope::decode_metadata(&existing)
                    .map(|m| m.written_at)
                    .unwrap_or_else(|_| Utc::now());
                let mut stamp = written_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
                while self.store.exists(&entry.archived(role, stamp).path())? {
                    stamp = stamp.saturating_add(1);
                }
                let archive = entry.archived(role, stamp);
                self.store.rename(&current.path(), &archive.path())?;
                trace!(path = %archive, "archived previous artifact");
            }
        }
        self.store.put(&current.path(), bytes)?;
        trace!(path = %current, bytes = bytes.len(), "wrote artifact");
        Ok(())
    }

    /// Current and archived artifacts of `role`, most recent first.
    pub fn history(
        &self,
        entry: &EntryAddress,
        role: ArtifactRole,
    ) -> Result<Vec<ArtifactAddress>, StorageError> {
        let prefix = format!("{}{}", entry.dir(), role.file_name());
        let mut found: Vec<ArtifactAddress> = self
            .store
            .list(&prefix)?
            .iter()
            .filter_map(|path| entry.function().parse(path))
            .filter(|address| address.role() == role && address.key() == entry.key())
            .collect();
        found.sort_by(|a, b| match (a.archived(), b.archived()) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => y.cmp(&x),
        });
        Ok(found)
    }

    /// Keys of `function` holding a current artifact of `role`, sorted.
    pub fn list_keys(
        &self,
        function: &FunctionAddress,
        role: ArtifactRole,
    ) -> Result<Vec<CacheKey>, StorageError> {
        let keys: BTreeSet<CacheKey> = self
            .store
            .list(&function.dir())?
            .iter()
            .filter_map(|path| function.parse(path))
            .filter(|address| address.role() == role && address.is_current())
            .map(|address| address.key())
            .collect();
        Ok(keys.into_iter().collect())
    }

    /// Function segments with at least one artifact under `prefix`.
    pub fn list_functions(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let root = FunctionAddress::from_segment(prefix, "");
        let dir = root.dir();
        let dir = dir.trim_end_matches('/');
        let base = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let functions: BTreeSet<String> = self
            .store
            .list(&base)?
            .iter()
            .filter_map(|path| {
                let mut segments = path.strip_prefix(&base)?.split('/');
                let function = segments.next()?;
                let key = segments.next()?;
                let _file = segments.next()?;
                if segments.next().is_some() || key.parse::<CacheKey>().is_err() {
                    return None;
                }
                Some(function.to_string())
            })
            .collect();
        Ok(functions.into_iter().collect())
    }

    /// Remove the current and archived artifacts of `role`.
    pub fn delete(&self, entry: &EntryAddress, role: ArtifactRole) -> Result<u64, StorageError> {
        let mut deleted = 0;
        for address in self.history(entry, role)? {
            if self.store.delete(&address.path())? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Remove every artifact of one entry.
    pub fn delete_entry(&self, entry: &EntryAddress) -> Result<u64, StorageError> {
        self.store.delete_prefix(&entry.dir())
    }

    /// Remove every artifact of one function.
    pub fn delete_function(&self, function: &FunctionAddress) -> Result<u64, StorageError> {
        self.store.delete_prefix(&function.dir())
    }
}
