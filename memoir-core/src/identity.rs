//! Identity types for memoized calls

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::KeyDerivationError;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Fixed-length fingerprint of one logical call.
///
/// Rendered as 64 lowercase hex characters, which is also the directory name
/// the key occupies in storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(ContentHash);

impl CacheKey {
    /// Wrap a raw digest.
    pub fn from_digest(digest: ContentHash) -> Self {
        Self(digest)
    }

    /// Hash canonical key material into a key.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Self {
        Self(compute_content_hash(bytes))
    }

    pub fn as_bytes(&self) -> &ContentHash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First `n` hex characters, for log lines.
    pub fn short(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(12);
        s
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.short())
    }
}

/// Error parsing a hex cache key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid cache key {input:?}: {reason}")]
pub struct ParseCacheKeyError {
    pub input: String,
    pub reason: String,
}

impl FromStr for CacheKey {
    type Err = ParseCacheKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| ParseCacheKeyError {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        let digest: ContentHash = bytes.try_into().map_err(|b: Vec<u8>| ParseCacheKeyError {
            input: s.to_string(),
            reason: format!("expected 32 bytes, got {}", b.len()),
        })?;
        Ok(Self(digest))
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Stable identity of a memoized function.
///
/// Built from the module path and the function name. The optional version tag
/// lets callers invalidate every entry of a function whose body changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId {
    module: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

impl FunctionId {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            version: None,
        }
    }

    /// Tag this identity with a version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Fully-qualified name, e.g. `reports::monthly::totals`.
    pub fn qualified_name(&self) -> String {
        if self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.module, self.name)
        }
    }

    /// Single path segment naming this function in storage,
    /// e.g. `reports.monthly.totals` or `reports.monthly.totals-v2`.
    ///
    /// Distinct identities never share a segment: module parts and the name
    /// keep only `[A-Za-z0-9_]`, the version also keeps `.` and `-`, and every
    /// other byte is written as `~XX`.
    pub fn path_segment(&self) -> String {
        let mut segment = String::new();
        if !self.module.is_empty() {
            for part in self.module.split("::") {
                escape_into(&mut segment, part, |_| false);
                segment.push('.');
            }
        }
        escape_into(&mut segment, &self.name, |_| false);
        if let Some(version) = &self.version {
            segment.push('-');
            escape_into(&mut segment, version, |c| matches!(c, '.' | '-'));
        }
        segment
    }

    /// Reject identities that cannot produce a usable path segment.
    pub fn validate(&self) -> Result<(), KeyDerivationError> {
        if self.name.trim().is_empty() {
            return Err(KeyDerivationError::NoCanonicalForm {
                argument: "function".to_string(),
                reason: "function name must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path_segment())
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn escape_into(out: &mut String, raw: &str, also_keep: impl Fn(char) -> bool) {
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || also_keep(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("~{byte:02X}"));
            }
        }
    }
}

/// Build a [`FunctionId`] for a function in the current module.
///
/// ```
/// use memoir_core::{function_id, FunctionId};
///
/// fn totals() {}
/// let id: FunctionId = function_id!(totals);
/// assert_eq!(id.name(), "totals");
/// let v2 = function_id!(totals, "v2");
/// assert_eq!(v2.version(), Some("v2"));
/// ```
#[macro_export]
macro_rules! function_id {
    ($name:ident) => {
        $crate::FunctionId::new(::std::module_path!(), ::std::stringify!($name))
    };
    ($name:ident, $version:expr) => {
        $crate::FunctionId::new(::std::module_path!(), ::std::stringify!($name))
            .with_version($version)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_hex_round_trip() {
        let key = CacheKey::from_canonical_bytes(b"hello");
        let hex = key.to_hex();
        assert_eq!(hex.len(), 64);
        let parsed: CacheKey = hex.parse().expect("valid hex key");
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_cache_key_known_digest() {
        // sha256("abc")
        let key = CacheKey::from_canonical_bytes(b"abc");
        assert_eq!(
            key.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cache_key_parse_rejects_wrong_length() {
        let err = "abcd".parse::<CacheKey>().unwrap_err();
        assert!(err.reason.contains("expected 32 bytes"));
        assert!("zz".parse::<CacheKey>().is_err());
    }

    #[test]
    fn test_cache_key_serde_as_string() {
        let key = CacheKey::from_canonical_bytes(b"k");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_hex()));
        let back: CacheKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_function_path_segment() {
        let id = FunctionId::new("reports::monthly", "totals");
        assert_eq!(id.qualified_name(), "reports::monthly::totals");
        assert_eq!(id.path_segment(), "reports.monthly.totals");

        let versioned = id.with_version("v2");
        assert_eq!(versioned.path_segment(), "reports.monthly.totals-v2");
    }

    #[test]
    fn test_function_path_segment_sanitized() {
        let id = FunctionId::new("a b", "f/g");
        assert_eq!(id.path_segment(), "a~20b.f~2Fg");
        let id = FunctionId::new("m", "f").with_version("1.2-rc/3");
        assert_eq!(id.path_segment(), "m.f-1.2-rc~2F3");
    }

    #[test]
    fn test_distinct_functions_distinct_segments() {
        let pairs = [
            (FunctionId::new("a.b", "c"), FunctionId::new("a", "b.c")),
            (FunctionId::new("a::b", "c"), FunctionId::new("a", "b.c")),
            (FunctionId::new("m", "f-v2"), FunctionId::new("m", "f").with_version("v2")),
            (FunctionId::new("a b", "f"), FunctionId::new("a_b", "f")),
            (FunctionId::new("m", "f~2D"), FunctionId::new("m", "f-")),
            (FunctionId::new("", "m.f"), FunctionId::new("m", "f")),
        ];
        for (a, b) in pairs {
            assert_ne!(a, b);
            assert_ne!(a.path_segment(), b.path_segment(), "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_function_id_macro() {
        fn totals() {}
        totals();
        let id = function_id!(totals);
        assert_eq!(id.name(), "totals");
        assert!(id.module().ends_with("identity::tests"));
    }

    #[test]
    fn test_function_id_validate() {
        assert!(FunctionId::new("m", "f").validate().is_ok());
        assert!(FunctionId::new("m", " ").validate().is_err());
    }
}
