//! Cache entries: roles, metadata, the artifact envelope and captured failures.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeserializationError, SerializationError};
use crate::expiry::ExpiryMode;
use crate::identity::{compute_content_hash, CacheKey, Timestamp};

/// Which payload of an entry an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactRole {
    Input,
    Output,
    Exception,
}

impl ArtifactRole {
    pub const ALL: [ArtifactRole; 3] = [Self::Input, Self::Output, Self::Exception];

    /// File name of the artifact under its key directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Exception => "exception",
        }
    }

    /// Roles that answer a call on replay.
    pub fn is_result(&self) -> bool {
        !matches!(self, Self::Input)
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

impl FromStr for ArtifactRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" | "inputs" => Ok(Self::Input),
            "output" | "data" => Ok(Self::Output),
            "exception" | "exc" => Ok(Self::Exception),
            other => Err(format!("unknown artifact role: {other}")),
        }
    }
}

/// Metadata stored with every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub key: CacheKey,
    /// Storage path segment of the function.
    pub function: String,
    pub role: ArtifactRole,
    /// Id of the codec that produced the payload.
    pub codec: String,
    pub written_at: Timestamp,
    /// Expiry mode in force when the artifact was written.
    pub expiry: ExpiryMode,
    /// Hex SHA-256 of the payload.
    pub content_hash: String,
}

impl EntryMetadata {
    pub fn new(
        key: CacheKey,
        function: impl Into<String>,
        role: ArtifactRole,
        codec: impl Into<String>,
        written_at: Timestamp,
        expiry: ExpiryMode,
        payload: &[u8],
    ) -> Self {
        Self {
            key,
            function: function.into(),
            role,
            codec: codec.into(),
            written_at,
            expiry,
            content_hash: hex::encode(compute_content_hash(payload)),
        }
    }
}

/// Magic bytes opening every artifact.
pub const ENVELOPE_MAGIC: [u8; 4] = *b"MEMO";

/// Current envelope version.
pub const ENVELOPE_VERSION: u8 = 1;

const HEADER_OFFSET: usize = 9;

/// One stored artifact: metadata plus payload, written as a single blob so
/// the two can never be observed out of step.
///
/// # Binary Format
///
/// ```text
/// [magic: 4 bytes "MEMO"][version: 1 byte][header_len: u32 LE][header: JSON][payload]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub metadata: EntryMetadata,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(metadata: EntryMetadata, payload: Vec<u8>) -> Self {
        Self { metadata, payload }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SerializationError> {
        let header = serde_json::to_vec(&self.metadata).map_err(|e| SerializationError::Encode {
            codec: "envelope".to_string(),
            reason: e.to_string(),
        })?;
        let header_len = u32::try_from(header.len()).map_err(|_| SerializationError::Encode {
            codec: "envelope".to_string(),
            reason: "header exceeds 4 GiB".to_string(),
        })?;

        let mut bytes = Vec::with_capacity(HEADER_OFFSET + header.len() + self.payload.len());
        bytes.extend_from_slice(&ENVELOPE_MAGIC);
        bytes.push(ENVELOPE_VERSION);
        bytes.extend_from_slice(&header_len.to_le_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// Parse only the header. Used for expiry checks and listings.
    pub fn decode_metadata(bytes: &[u8]) -> Result<EntryMetadata, DeserializationError> {
        let (metadata, _) = Self::split(bytes)?;
        Ok(metadata)
    }

    /// Parse header and payload, verifying the payload hash.
    pub fn decode(bytes: &[u8]) -> Result<Self, DeserializationError> {
        let (metadata, payload) = Self::split(bytes)?;
        let actual = hex::encode(compute_content_hash(payload));
        if actual != metadata.content_hash {
            return Err(DeserializationError::CorruptEnvelope {
                reason: format!(
                    "payload hash mismatch: expected {}, got {}",
                    metadata.content_hash, actual
                ),
            });
        }
        Ok(Self {
            metadata,
            payload: payload.to_vec(),
        })
    }

    fn split(bytes: &[u8]) -> Result<(EntryMetadata, &[u8]), DeserializationError> {
        let corrupt = |reason: String| DeserializationError::CorruptEnvelope { reason };

        if bytes.len() < HEADER_OFFSET {
            return Err(corrupt(format!("{} bytes is shorter than the header", bytes.len())));
        }
        if bytes[0..4] != ENVELOPE_MAGIC {
            return Err(corrupt("missing envelope magic".to_string()));
        }
        if bytes[4] != ENVELOPE_VERSION {
            return Err(corrupt(format!("unsupported envelope version {}", bytes[4])));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[5..HEADER_OFFSET]);
        let header_end = HEADER_OFFSET + u32::from_le_bytes(len_bytes) as usize;
        if bytes.len() < header_end {
            return Err(corrupt("truncated header".to_string()));
        }
        let metadata: EntryMetadata = serde_json::from_slice(&bytes[HEADER_OFFSET..header_end])
            .map_err(|e| corrupt(e.to_string()))?;
        Ok((metadata, &bytes[header_end..]))
    }
}

/// A failure of the wrapped function, captured for persistence and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedFailure {
    /// Rust type name of the original error.
    pub type_name: String,
    /// `Display` of the original error.
    pub message: String,
    /// `Display` of each `source()` in the chain, outermost first.
    #[serde(default)]
    pub chain: Vec<String>,
    /// Structured form of the error, when it has one.
    #[serde(default)]
    pub payload: Option<Value>,
}

impl CapturedFailure {
    /// Capture any error, walking its source chain.
    ///
    /// This is the bridge for error types that are not serializable, such as
    /// `std::io::Error`: map them into a `CapturedFailure` before returning.
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            chain,
            payload: None,
        }
    }
}

impl fmt::Display for CapturedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.chain {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CapturedFailure {}

/// Errors the orchestrator can persist and raise again on a later hit.
///
/// Implemented for every serializable error with a `Display`; the replayed
/// value is deserialized from the captured payload.
pub trait ReplayableError: Sized {
    fn capture(&self) -> CapturedFailure;

    fn replay(failure: &CapturedFailure) -> Result<Self, DeserializationError>;
}

impl<E> ReplayableError for E
where
    E: Serialize + DeserializeOwned + fmt::Display,
{
    fn capture(&self) -> CapturedFailure {
        CapturedFailure {
            type_name: std::any::type_name::<E>().to_string(),
            message: self.to_string(),
            chain: Vec::new(),
            payload: serde_json::to_value(self).ok(),
        }
    }

    fn replay(failure: &CapturedFailure) -> Result<Self, DeserializationError> {
        let payload = failure
            .payload
            .clone()
            .ok_or_else(|| DeserializationError::FailureReplay {
                type_name: failure.type_name.clone(),
                reason: "captured failure has no payload".to_string(),
            })?;
        serde_json::from_value(payload).map_err(|e| DeserializationError::FailureReplay {
            type_name: failure.type_name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Result of one execution, before it is turned back into `Result<T, E>` at
/// the orchestrator boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Returned(T),
    Raised(CapturedFailure),
}

impl<T> Outcome<T> {
    pub fn role(&self) -> ArtifactRole {
        match self {
            Self::Returned(_) => ArtifactRole::Output,
            Self::Raised(_) => ArtifactRole::Exception,
        }
    }

    pub fn is_raised(&self) -> bool {
        matches!(self, Self::Raised(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata(payload: &[u8]) -> EntryMetadata {
        EntryMetadata::new(
            CacheKey::from_canonical_bytes(b"k"),
            "m.f",
            ArtifactRole::Output,
            "json",
            Utc::now(),
            ExpiryMode::Never,
            payload,
        )
    }

    #[test]
    fn test_envelope_round_trip() {
        let payload = b"[1,2,3]".to_vec();
        let envelope = Envelope::new(metadata(&payload), payload);
        let bytes = envelope.encode().unwrap();
        assert_eq!(&bytes[0..4], b"MEMO");
        assert_eq!(Envelope::decode(&bytes).unwrap(), envelope);
        assert_eq!(Envelope::decode_metadata(&bytes).unwrap(), envelope.metadata);
    }

    #[test]
    fn test_envelope_detects_tampered_payload() {
        let payload = b"\"ok\"".to_vec();
        let mut bytes = Envelope::new(metadata(&payload), payload).encode().unwrap();
        let last = bytes.len() - 2;
        bytes[last] = b'X';
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(DeserializationError::CorruptEnvelope { .. })
        ));
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        assert!(Envelope::decode(b"").is_err());
        assert!(Envelope::decode(b"NOPE00000000").is_err());
        let mut bytes = Envelope::new(metadata(b""), Vec::new()).encode().unwrap();
        bytes.truncate(12);
        assert!(Envelope::decode(&bytes).is_err());
    }

    #[test]
    fn test_role_names() {
        for role in ArtifactRole::ALL {
            assert_eq!(role.file_name().parse::<ArtifactRole>().unwrap(), role);
        }
        assert!(!ArtifactRole::Input.is_result());
        assert!(ArtifactRole::Exception.is_result());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
    enum QuoteError {
        #[error("no market data for {0}")]
        NoData(String),
    }

    #[test]
    fn test_typed_error_replays_equal() {
        let original = QuoteError::NoData("ACME".into());
        let captured = original.capture();
        assert_eq!(captured.message, "no market data for ACME");
        assert!(captured.type_name.ends_with("QuoteError"));
        let replayed = QuoteError::replay(&captured).unwrap();
        assert_eq!(replayed, original);
    }

    #[test]
    fn test_replay_without_payload_fails() {
        let captured = CapturedFailure::from_error(&std::io::Error::other("boom"));
        assert!(QuoteError::replay(&captured).is_err());
    }

    #[test]
    fn test_captured_failure_walks_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("load failed")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::other("disk gone"));
        let captured = CapturedFailure::from_error(&err);
        assert_eq!(captured.chain, vec!["disk gone".to_string()]);
        assert_eq!(captured.to_string(), "load failed: disk gone");

        // CapturedFailure is itself replayable.
        let again = CapturedFailure::replay(&captured.capture()).unwrap();
        assert_eq!(again, captured);
    }

    #[test]
    fn test_outcome_role() {
        assert_eq!(Outcome::Returned(1).role(), ArtifactRole::Output);
        let raised: Outcome<i32> = Outcome::Raised(CapturedFailure::from_error(&std::io::Error::other("x")));
        assert_eq!(raised.role(), ArtifactRole::Exception);
        assert!(raised.is_raised());
    }
}
