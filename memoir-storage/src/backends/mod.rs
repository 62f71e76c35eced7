//! Blob store implementations.

mod lmdb;
mod local;
mod memory;

pub use lmdb::{LmdbBlobStore, DEFAULT_MAP_SIZE_MB};
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
