//! memoir Storage - Blob Stores and Artifact Layout
//!
//! Defines the [`BlobStore`] abstraction, the bundled backends (memory,
//! local filesystem, LMDB) and the [`StorageAdapter`] that lays entries out
//! as `{function}/{key}/{role}` artifacts on top of any store.

pub mod adapter;
pub mod address;
pub mod backends;
pub mod location;
pub mod traits;

pub use adapter::StorageAdapter;
pub use address::{ArtifactAddress, EntryAddress, FunctionAddress};
pub use backends::{LmdbBlobStore, LocalBlobStore, MemoryBlobStore, DEFAULT_MAP_SIZE_MB};
pub use location::StorageLocation;
pub use traits::{validate_path, BlobStore};
