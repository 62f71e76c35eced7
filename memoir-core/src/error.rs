//! Error types for memoir operations

use thiserror::Error;

/// Errors raised while turning a call into a cache key.
///
/// These are fatal for the call: the orchestrator surfaces them to the caller
/// and never caches anything under a key it could not derive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyDerivationError {
    #[error("Argument {argument} has no canonical form: {reason}")]
    NoCanonicalForm { argument: String, reason: String },

    #[error("State snapshot of {type_name} could not be serialized: {reason}")]
    ReceiverSnapshot { type_name: String, reason: String },
}

/// Errors raised while decoding a stored artifact.
///
/// The orchestrator treats these as a cache miss unless configured otherwise.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeserializationError {
    #[error("Unknown codec: {codec}")]
    UnknownCodec { codec: String },

    #[error("Decode with {codec} failed: {reason}")]
    Decode { codec: String, reason: String },

    #[error("Corrupt artifact envelope: {reason}")]
    CorruptEnvelope { reason: String },

    #[error("Cannot replay failure of type {type_name}: {reason}")]
    FailureReplay { type_name: String, reason: String },
}

/// Errors raised while encoding a value for storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Encode with {codec} failed: {reason}")]
    Encode { codec: String, reason: String },

    #[error("Value is not tabular: {reason}")]
    NotTabular { reason: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Artifact not found: {path}")]
    NotFound { path: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("{backend} backend error: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Storage operation timed out on {path}")]
    Timeout { path: String },

    #[error("Invalid storage path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported storage location: {location}")]
    UnsupportedLocation { location: String },
}

/// Master error type for all memoir errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoError {
    #[error("Key derivation error: {0}")]
    KeyDerivation(#[from] KeyDerivationError),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] DeserializationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl MemoError {
    /// Errors on the read path that degrade to a cache miss instead of
    /// reaching the caller.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Self::Deserialization(_) | Self::Storage(_))
    }

    /// True when the artifact simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type alias for memoir operations.
pub type MemoResult<T> = Result<T, MemoError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation_error_display() {
        let err = KeyDerivationError::NoCanonicalForm {
            argument: "conn".to_string(),
            reason: "opaque value".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("conn"));
        assert!(msg.contains("opaque value"));
    }

    #[test]
    fn test_deserialization_error_display_unknown_codec() {
        let err = DeserializationError::UnknownCodec {
            codec: "pickle".to_string(),
        };
        assert!(format!("{}", err).contains("pickle"));
    }

    #[test]
    fn test_storage_error_display_io() {
        let err = StorageError::Io {
            path: "f/k/output".to_string(),
            reason: "disk full".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("f/k/output"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_memo_error_from_variants() {
        let storage = MemoError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, MemoError::Storage(_)));

        let config = MemoError::from(ConfigError::UnsupportedLocation {
            location: "s3://bucket".to_string(),
        });
        assert!(matches!(config, MemoError::Config(_)));

        let key = MemoError::from(KeyDerivationError::ReceiverSnapshot {
            type_name: "Model".to_string(),
            reason: "map key must be a string".to_string(),
        });
        assert!(matches!(key, MemoError::KeyDerivation(_)));
    }

    #[test]
    fn test_cache_miss_classification() {
        assert!(MemoError::from(StorageError::Timeout {
            path: "x".to_string()
        })
        .is_cache_miss());
        assert!(MemoError::from(DeserializationError::CorruptEnvelope {
            reason: "short".to_string()
        })
        .is_cache_miss());
        assert!(!MemoError::from(KeyDerivationError::NoCanonicalForm {
            argument: "a".to_string(),
            reason: "b".to_string()
        })
        .is_cache_miss());
    }

    #[test]
    fn test_not_found() {
        let err = MemoError::from(StorageError::NotFound {
            path: "a/b".to_string(),
        });
        assert!(err.is_not_found());
        assert!(!MemoError::from(StorageError::LockPoisoned).is_not_found());
    }
}
