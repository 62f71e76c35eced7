//! Local filesystem blob store.
//!
//! Every blob is a file under the root directory. Writes go to a temporary
//! file in the destination directory and are renamed into place, so readers
//! never see a partial artifact.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use memoir_core::StorageError;
use tempfile::NamedTempFile;

use crate::traits::{validate_path, BlobStore};

/// Temporary files in flight start with this; listings skip them.
const TEMP_PREFIX: &str = ".tmp";

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open (and create) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        Ok(Self { root })
    }

    /// Store under `memoir/` in the system temp directory.
    pub fn in_temp_dir() -> Result<Self, StorageError> {
        Self::new(std::env::temp_dir().join("memoir"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg)))
    }

    fn walk(&self, dir: &Path, relative: &str, out: &mut Vec<String>) -> Result<(), StorageError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_error(dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let child = if relative.is_empty() {
                name
            } else {
                format!("{relative}/{name}")
            };
            let file_type = entry.file_type().map_err(|e| io_error(&entry.path(), e))?;
            if file_type.is_dir() {
                self.walk(&entry.path(), &child, out)?;
            } else if file_type.is_file() {
                out.push(child);
            }
        }
        Ok(())
    }

    /// Remove now-empty directories between `file` and the root.
    fn prune_empty_parents(&self, file: &Path) {
        let mut dir = file.parent();
        while let Some(d) = dir {
            if d == self.root.as_path() || fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

impl BlobStore for LocalBlobStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let file = self.resolve(path)?;
        match fs::read(&file) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&file, e)),
        }
    }

    fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let file = self.resolve(path)?;
        let parent = file.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| io_error(parent, e))?;
        temp.write_all(bytes).map_err(|e| io_error(temp.path(), e))?;
        temp.as_file().sync_all().map_err(|e| io_error(temp.path(), e))?;
        temp.persist(&file).map_err(|e| io_error(&file, e.error))?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let file = self.resolve(path)?;
        match fs::remove_file(&file) {
            Ok(()) => {
                self.prune_empty_parents(&file);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&file, e)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // Start at the deepest directory fully named by the prefix.
        let (dir_part, _) = prefix.rsplit_once('/').unwrap_or(("", prefix));
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir_part)?
        };
        let mut paths = Vec::new();
        self.walk(&start, dir_part, &mut paths)?;
        paths.retain(|p| p.starts_with(prefix));
        paths.sort();
        Ok(paths)
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(path)?.is_file())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        fs::rename(&source, &target).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound {
                    path: from.to_string(),
                }
            } else {
                io_error(&source, e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalBlobStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LocalBlobStore::new(temp_dir.path()).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[test]
    fn test_put_and_get() {
        let (store, dir) = create_test_store();
        store.put("m.f/abc/output", b"payload").unwrap();
        assert_eq!(store.get("m.f/abc/output").unwrap(), Some(b"payload".to_vec()));
        assert!(dir.path().join("m.f").join("abc").join("output").is_file());
    }

    #[test]
    fn test_get_missing_is_none() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.get("nope/output").unwrap(), None);
        assert!(!store.exists("nope/output").unwrap());
    }

    #[test]
    fn test_put_replaces() {
        let (store, _dir) = create_test_store();
        store.put("f/k/output", b"one").unwrap();
        store.put("f/k/output", b"two").unwrap();
        assert_eq!(store.get("f/k/output").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.list("f/").unwrap(), vec!["f/k/output".to_string()]);
    }

    #[test]
    fn test_list_prefix_matches_partial_segment() {
        let (store, _dir) = create_test_store();
        store.put("f/k/output", b"1").unwrap();
        store.put("f/k/output.17", b"2").unwrap();
        store.put("f/k/input", b"3").unwrap();
        store.put("g/k/output", b"4").unwrap();
        assert_eq!(
            store.list("f/k/output").unwrap(),
            vec!["f/k/output".to_string(), "f/k/output.17".to_string()]
        );
        assert_eq!(store.list("").unwrap().len(), 4);
        assert!(store.list("missing/").unwrap().is_empty());
    }

    #[test]
    fn test_delete_prunes_empty_directories() {
        let (store, dir) = create_test_store();
        store.put("f/k/output", b"1").unwrap();
        assert!(store.delete("f/k/output").unwrap());
        assert!(!dir.path().join("f").exists());
        assert!(dir.path().exists());
        assert!(!store.delete("f/k/output").unwrap());
    }

    #[test]
    fn test_rename() {
        let (store, _dir) = create_test_store();
        store.put("f/k/output", b"old").unwrap();
        store.rename("f/k/output", "f/k/output.1").unwrap();
        assert_eq!(store.get("f/k/output").unwrap(), None);
        assert_eq!(store.get("f/k/output.1").unwrap(), Some(b"old".to_vec()));
        assert!(matches!(
            store.rename("f/k/output", "f/k/output.2"),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let (store, _dir) = create_test_store();
        assert!(matches!(
            store.put("../outside", b"x"),
            Err(StorageError::InvalidPath { .. })
        ));
    }
}
