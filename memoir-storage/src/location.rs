//! Storage location URIs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use memoir_core::{ConfigError, MemoError};

use crate::backends::{LmdbBlobStore, LocalBlobStore, MemoryBlobStore, DEFAULT_MAP_SIZE_MB};
use crate::traits::BlobStore;

/// Where artifacts live.
///
/// | URI | Backend |
/// |-----|---------|
/// | `memory://` | [`MemoryBlobStore`], private to the process |
/// | `temp://` | [`LocalBlobStore`] under the system temp dir |
/// | `file:///abs/path` or a bare path | [`LocalBlobStore`] |
/// | `lmdb:///abs/path` | [`LmdbBlobStore`] |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Memory,
    Temp,
    Local(PathBuf),
    Lmdb(PathBuf),
}

impl StorageLocation {
    /// Open the backend this location names.
    pub fn open(&self) -> Result<Arc<dyn BlobStore>, MemoError> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryBlobStore::new()),
            Self::Temp => Arc::new(LocalBlobStore::in_temp_dir()?),
            Self::Local(path) => Arc::new(LocalBlobStore::new(path)?),
            Self::Lmdb(path) => Arc::new(LmdbBlobStore::new(path, DEFAULT_MAP_SIZE_MB)?),
        })
    }
}

impl FromStr for StorageLocation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage_location".to_string(),
                value: String::new(),
                reason: "location is empty".to_string(),
            });
        }
        let Some((scheme, rest)) = s.split_once("://") else {
            return Ok(Self::Local(PathBuf::from(s)));
        };
        let path = || {
            if rest.is_empty() {
                Err(ConfigError::InvalidValue {
                    field: "storage_location".to_string(),
                    value: s.to_string(),
                    reason: format!("{scheme}:// needs a path"),
                })
            } else {
                Ok(PathBuf::from(rest))
            }
        };
        match scheme.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "temp" => Ok(Self::Temp),
            "file" => Ok(Self::Local(path()?)),
            "lmdb" => Ok(Self::Lmdb(path()?)),
            _ => Err(ConfigError::UnsupportedLocation {
                location: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory://"),
            Self::Temp => f.write_str("temp://"),
            Self::Local(path) => write!(f, "file://{}", path.display()),
            Self::Lmdb(path) => write!(f, "lmdb://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_locations() {
        assert_eq!("memory://".parse::<StorageLocation>().unwrap(), StorageLocation::Memory);
        assert_eq!("temp://".parse::<StorageLocation>().unwrap(), StorageLocation::Temp);
        assert_eq!(
            "file:///var/cache/memoir".parse::<StorageLocation>().unwrap(),
            StorageLocation::Local(PathBuf::from("/var/cache/memoir"))
        );
        assert_eq!(
            "./cache".parse::<StorageLocation>().unwrap(),
            StorageLocation::Local(PathBuf::from("./cache"))
        );
        assert_eq!(
            "lmdb:///data/memo".parse::<StorageLocation>().unwrap(),
            StorageLocation::Lmdb(PathBuf::from("/data/memo"))
        );
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        assert!(matches!(
            "s3://bucket/prefix".parse::<StorageLocation>(),
            Err(ConfigError::UnsupportedLocation { .. })
        ));
        assert!("file://".parse::<StorageLocation>().is_err());
        assert!("".parse::<StorageLocation>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for location in [
            StorageLocation::Memory,
            StorageLocation::Local(PathBuf::from("/tmp/x")),
            StorageLocation::Lmdb(PathBuf::from("/tmp/y")),
        ] {
            assert_eq!(location.to_string().parse::<StorageLocation>().unwrap(), location);
        }
    }

    #[test]
    fn test_open_backends() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let local = StorageLocation::Local(dir.path().join("files")).open().unwrap();
        assert_eq!(local.backend_name(), "local");
        let lmdb = StorageLocation::Lmdb(dir.path().join("lmdb")).open().unwrap();
        assert_eq!(lmdb.backend_name(), "lmdb");
        assert_eq!(StorageLocation::Memory.open().unwrap().backend_name(), "memory");
    }
}
