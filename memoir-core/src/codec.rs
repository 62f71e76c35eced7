//! Codecs turning values into artifact payloads and back.
//!
//! Every artifact records the id of the codec that wrote it, so decoding never
//! depends on the current configuration; only encoding does.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::columnar;
use crate::error::{ConfigError, DeserializationError, SerializationError};
use crate::finite::ensure_finite;

/// A concrete codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Self-describing JSON. The default. Rejects NaN and infinities.
    Json,
    /// Compact positional binary via bincode. Lossless for every float.
    Bincode,
    /// Column-major binary for tabular values.
    Columnar,
}

impl CodecKind {
    /// Identifier recorded in artifact metadata.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bincode => "bincode",
            Self::Columnar => "columnar",
        }
    }

    /// Resolve a recorded codec id.
    pub fn from_id(id: &str) -> Result<Self, DeserializationError> {
        match id {
            "json" => Ok(Self::Json),
            "bincode" => Ok(Self::Bincode),
            "columnar" => Ok(Self::Columnar),
            other => Err(DeserializationError::UnknownCodec {
                codec: other.to_string(),
            }),
        }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        let encode_err = |reason: String| SerializationError::Encode {
            codec: self.id().to_string(),
            reason,
        };
        match self {
            Self::Json => {
                ensure_finite(value).map_err(encode_err)?;
                serde_json::to_vec(value).map_err(|e| encode_err(e.to_string()))
            }
            Self::Bincode => bincode::serialize(value).map_err(|e| encode_err(e.to_string())),
            Self::Columnar => {
                ensure_finite(value).map_err(encode_err)?;
                let json = serde_json::to_value(value).map_err(|e| encode_err(e.to_string()))?;
                columnar::encode_value(&json)
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, DeserializationError> {
        let decode_err = |reason: String| DeserializationError::Decode {
            codec: self.id().to_string(),
            reason,
        };
        match self {
            Self::Json => serde_json::from_slice(bytes).map_err(|e| decode_err(e.to_string())),
            Self::Bincode => bincode::deserialize(bytes).map_err(|e| decode_err(e.to_string())),
            Self::Columnar => {
                let json = columnar::decode_value(bytes)?;
                serde_json::from_value(json).map_err(|e| decode_err(e.to_string()))
            }
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// How a role picks its codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecSelector {
    /// Columnar when the value has tabular shape, JSON otherwise.
    #[default]
    Auto,
    Json,
    Bincode,
    Columnar,
}

impl CodecSelector {
    /// Pick a codec for `value` and encode it.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<(CodecKind, Vec<u8>), SerializationError> {
        let kind = match self {
            Self::Json => CodecKind::Json,
            Self::Bincode => CodecKind::Bincode,
            Self::Columnar => CodecKind::Columnar,
            Self::Auto => {
                ensure_finite(value).map_err(|reason| SerializationError::Encode {
                    codec: CodecKind::Json.id().to_string(),
                    reason,
                })?;
                let json = serde_json::to_value(value).map_err(|e| SerializationError::Encode {
                    codec: CodecKind::Json.id().to_string(),
                    reason: e.to_string(),
                })?;
                if columnar::is_tabular(&json) {
                    return Ok((CodecKind::Columnar, columnar::encode_value(&json)?));
                }
                CodecKind::Json
            }
        };
        Ok((kind, kind.encode(value)?))
    }

    /// Selector for payloads that are never tabular.
    pub fn structured(&self) -> CodecKind {
        match self {
            Self::Bincode => CodecKind::Bincode,
            _ => CodecKind::Json,
        }
    }
}

impl FromStr for CodecSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "json" => Ok(Self::Json),
            "bincode" => Ok(Self::Bincode),
            "columnar" => Ok(Self::Columnar),
            other => Err(ConfigError::InvalidValue {
                field: "codec".to_string(),
                value: other.to_string(),
                reason: "expected one of auto, json, bincode, columnar".to_string(),
            }),
        }
    }
}
