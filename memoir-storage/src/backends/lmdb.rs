//! LMDB-backed blob store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep every artifact in a
//! single memory-mapped database file. Keys are the UTF-8 blob paths, so a
//! prefix listing is an ordered key scan.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `list`
//! - Write transactions for `put`, `delete` and `rename`
//!
//! `rename` runs in one write transaction, which makes append-mode archiving
//! atomic on this backend.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use memoir_core::StorageError;

use crate::traits::{validate_path, BlobStore};

/// Default map size when opened from a storage location.
pub const DEFAULT_MAP_SIZE_MB: usize = 1024;

const BACKEND: &str = "lmdb";

fn txn_error(e: heed::Error) -> StorageError {
    StorageError::Backend {
        backend: BACKEND.to_string(),
        reason: e.to_string(),
    }
}

/// Blob store in an LMDB environment.
///
/// # Example
///
/// ```ignore
/// use memoir_storage::{BlobStore, LmdbBlobStore};
///
/// let store = LmdbBlobStore::new("/var/cache/memoir", 256)?;
/// store.put("reports.totals/9f2c.../output", &bytes)?;
/// ```
pub struct LmdbBlobStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbBlobStore {
    /// Open (and create) an LMDB store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, StorageError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| StorageError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // SAFETY: the environment is opened once per store and the directory is
        // not shared with another open environment in this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path)
        }
        .map_err(txn_error)?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self { env, db })
    }

    /// Number of blobs stored.
    pub fn len(&self) -> Result<u64, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.db.len(&rtxn).map_err(txn_error)
    }
}

impl BlobStore for LmdbBlobStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let bytes = self.db.get(&rtxn, path.as_bytes()).map_err(txn_error)?;
        Ok(bytes.map(<[u8]>::to_vec))
    }

    fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_path(path)?;
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, path.as_bytes(), bytes)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self
            .db
            .delete(&mut wtxn, path.as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let prefix = prefix.as_bytes();

        let mut paths = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, _) = result.map_err(txn_error)?;
            if key.starts_with(prefix) {
                if let Ok(path) = std::str::from_utf8(key) {
                    paths.push(path.to_string());
                }
            }
        }
        Ok(paths)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        validate_path(to)?;
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let bytes = self
            .db
            .get(&wtxn, from.as_bytes())
            .map_err(txn_error)?
            .map(<[u8]>::to_vec)
            .ok_or_else(|| StorageError::NotFound {
                path: from.to_string(),
            })?;
        self.db
            .put(&mut wtxn, to.as_bytes(), &bytes)
            .map_err(txn_error)?;
        self.db
            .delete(&mut wtxn, from.as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let keys = self.list(prefix)?;

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbBlobStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbBlobStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store();
        store.put("m.f/k/output", b"value").expect("put should succeed");
        assert_eq!(
            store.get("m.f/k/output").expect("get should succeed"),
            Some(b"value".to_vec())
        );
        assert_eq!(store.len().expect("len should succeed"), 1);
    }

    #[test]
    fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        assert_eq!(store.get("m.f/k/output").expect("get should succeed"), None);
    }

    #[test]
    fn test_delete() {
        let (store, _temp_dir) = create_test_store();
        store.put("m.f/k/output", b"value").expect("put should succeed");
        assert!(store.delete("m.f/k/output").expect("delete should succeed"));
        assert!(!store.delete("m.f/k/output").expect("delete should succeed"));
        assert!(!store.exists("m.f/k/output").expect("exists should succeed"));
    }

    #[test]
    fn test_list_and_delete_prefix() {
        let (store, _temp_dir) = create_test_store();
        for path in ["a/k1/output", "a/k2/output", "ab/k/output", "b/k/output"] {
            store.put(path, b"x").expect("put should succeed");
        }
        assert_eq!(
            store.list("a/").expect("list should succeed"),
            vec!["a/k1/output".to_string(), "a/k2/output".to_string()]
        );
        assert_eq!(store.delete_prefix("a/").expect("delete should succeed"), 2);
        assert_eq!(store.len().expect("len should succeed"), 2);
    }

    #[test]
    fn test_rename_is_atomic_move() {
        let (store, _temp_dir) = create_test_store();
        store.put("f/k/output", b"old").expect("put should succeed");
        store
            .rename("f/k/output", "f/k/output.5")
            .expect("rename should succeed");
        assert_eq!(store.get("f/k/output").expect("get should succeed"), None);
        assert_eq!(
            store.get("f/k/output.5").expect("get should succeed"),
            Some(b"old".to_vec())
        );
        assert!(matches!(
            store.rename("f/k/output", "f/k/output.6"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbBlobStore::new(temp_dir.path(), 10).expect("open should succeed");
            store.put("f/k/output", b"kept").expect("put should succeed");
        }
        let store = LmdbBlobStore::new(temp_dir.path(), 10).expect("reopen should succeed");
        assert_eq!(
            store.get("f/k/output").expect("get should succeed"),
            Some(b"kept".to_vec())
        );
    }
}
