//! memoir Core - Keys, Codecs, Expiry and Configuration
//!
//! Pure building blocks of the memoization engine. Nothing here touches
//! storage or runs user code; every other crate depends on this one.

pub mod args;
pub mod codec;
pub mod columnar;
pub mod config;
pub mod entry;
pub mod error;
pub mod expiry;
mod finite;
pub mod identity;
pub mod key;

pub use args::{canonicalize, ArgValue, CallArgs, InputSnapshot, Receiver, ReceiverRecord, StateSnapshot};
pub use codec::{CodecKind, CodecSelector};
pub use config::{EngineSettings, MemoConfig, WriteMode, DEFAULT_STORAGE_LOCATION};
pub use entry::{
    ArtifactRole, CapturedFailure, EntryMetadata, Envelope, Outcome, ReplayableError,
    ENVELOPE_MAGIC, ENVELOPE_VERSION,
};
pub use error::{
    ConfigError, DeserializationError, KeyDerivationError, MemoError, MemoResult,
    SerializationError, StorageError,
};
pub use expiry::{is_valid, ExpiryMode, Period};
pub use identity::{
    compute_content_hash, sanitize_segment, CacheKey, ContentHash, FunctionId, ParseCacheKeyError,
    Timestamp,
};
pub use key::{canonical_key_bytes, derive_key};
