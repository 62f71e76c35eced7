//! Artifact addressing.
//!
//! Layout, relative to the store root:
//!
//! ```text
//! [{prefix}/]{function}/{key}/{role}              current artifact
//! [{prefix}/]{function}/{key}/{role}.{stamp}      archived artifact (append mode)
//! ```
//!
//! `{function}` is [`FunctionId::path_segment`], `{key}` the hex cache key,
//! `{role}` one of `input`, `output`, `exception`, and `{stamp}` the write
//! time of the archived artifact in nanoseconds since the Unix epoch.

use std::fmt;

use memoir_core::{ArtifactRole, CacheKey, FunctionId};

/// Directory of one function's entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionAddress {
    prefix: Option<String>,
    function: String,
}

impl FunctionAddress {
    pub fn new(prefix: Option<&str>, function: &FunctionId) -> Self {
        Self::from_segment(prefix, function.path_segment())
    }

    /// Address a function by its stored segment, e.g. from a listing.
    pub fn from_segment(prefix: Option<&str>, segment: impl Into<String>) -> Self {
        Self {
            prefix: prefix
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            function: segment.into(),
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Path of the directory, with a trailing `/`.
    pub fn dir(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}/", prefix, self.function),
            None => format!("{}/", self.function),
        }
    }

    pub fn entry(&self, key: CacheKey) -> EntryAddress {
        EntryAddress {
            function: self.clone(),
            key,
        }
    }

    /// Parse a path under this directory back into an artifact address.
    pub fn parse(&self, path: &str) -> Option<ArtifactAddress> {
        let rest = path.strip_prefix(&self.dir())?;
        let (key, file) = rest.split_once('/')?;
        let key: CacheKey = key.parse().ok()?;
        let (role, archived) = match file.split_once('.') {
            Some((role, stamp)) => (role, Some(stamp.parse::<i64>().ok()?)),
            None => (file, None),
        };
        let role = match role {
            "input" => ArtifactRole::Input,
            "output" => ArtifactRole::Output,
            "exception" => ArtifactRole::Exception,
            _ => return None,
        };
        Some(ArtifactAddress {
            entry: self.entry(key),
            role,
            archived,
        })
    }
}

/// Directory of one entry: all artifacts of one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryAddress {
    function: FunctionAddress,
    key: CacheKey,
}

impl EntryAddress {
    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn function(&self) -> &FunctionAddress {
        &self.function
    }

    pub fn dir(&self) -> String {
        format!("{}{}/", self.function.dir(), self.key.to_hex())
    }

    pub fn current(&self, role: ArtifactRole) -> ArtifactAddress {
        ArtifactAddress {
            entry: self.clone(),
            role,
            archived: None,
        }
    }

    pub fn archived(&self, role: ArtifactRole, stamp: i64) -> ArtifactAddress {
        ArtifactAddress {
            entry: self.clone(),
            role,
            archived: Some(stamp),
        }
    }
}

/// One stored artifact, current or archived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactAddress {
    entry: EntryAddress,
    role: ArtifactRole,
    archived: Option<i64>,
}

impl ArtifactAddress {
    pub fn entry(&self) -> &EntryAddress {
        &self.entry
    }

    pub fn key(&self) -> CacheKey {
        self.entry.key
    }

    pub fn role(&self) -> ArtifactRole {
        self.role
    }

    /// Archive stamp, `None` for the current artifact.
    pub fn archived(&self) -> Option<i64> {
        self.archived
    }

    pub fn is_current(&self) -> bool {
        self.archived.is_none()
    }

    pub fn path(&self) -> String {
        match self.archived {
            Some(stamp) => format!("{}{}.{}", self.entry.dir(), self.role.file_name(), stamp),
            None => format!("{}{}", self.entry.dir(), self.role.file_name()),
        }
    }
}

impl fmt::Display for ArtifactAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key() -> CacheKey {
        CacheKey::from_canonical_bytes(b"k")
    }

    #[test]
    fn test_paths() {
        let function = FunctionAddress::new(None, &FunctionId::new("reports", "totals"));
        let entry = function.entry(key());
        assert_eq!(function.dir(), "reports.totals/");
        assert_eq!(
            entry.current(ArtifactRole::Output).path(),
            format!("reports.totals/{}/output", key().to_hex())
        );
        assert_eq!(
            entry.archived(ArtifactRole::Exception, 42).path(),
            format!("reports.totals/{}/exception.42", key().to_hex())
        );
    }

    #[test]
    fn test_prefix_is_normalized() {
        let function = FunctionAddress::from_segment(Some("/team/a/"), "m.f");
        assert_eq!(function.dir(), "team/a/m.f/");
        assert_eq!(FunctionAddress::from_segment(Some(""), "m.f").dir(), "m.f/");
    }

    #[test]
    fn test_parse_round_trip() {
        let function = FunctionAddress::from_segment(Some("p"), "m.f");
        let entry = function.entry(key());
        for address in [
            entry.current(ArtifactRole::Input),
            entry.current(ArtifactRole::Output),
            entry.archived(ArtifactRole::Output, 1_700_000_000_000_000_000),
        ] {
            assert_eq!(function.parse(&address.path()), Some(address));
        }
    }

    #[test]
    fn test_parse_rejects_foreign_paths() {
        let function = FunctionAddress::from_segment(None, "m.f");
        assert_eq!(function.parse("other/abc/output"), None);
        assert_eq!(function.parse("m.f/not-a-key/output"), None);
        let k = key().to_hex();
        assert_eq!(function.parse(&format!("m.f/{k}/result")), None);
        assert_eq!(function.parse(&format!("m.f/{k}/output.x")), None);
    }

    // ========================================================================
    // Property: every rendered artifact path parses back to its address
    // ========================================================================

    fn arb_role() -> impl Strategy<Value = ArtifactRole> {
        prop_oneof![
            Just(ArtifactRole::Input),
            Just(ArtifactRole::Output),
            Just(ArtifactRole::Exception),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_parse_inverts_path(
            prefix in proptest::option::of("[a-z]{1,6}(/[a-z]{1,6}){0,2}"),
            module in "[a-z_]{1,6}(::[a-z_]{1,6}){0,2}",
            name in "[a-z._ -]{1,10}",
            version in proptest::option::of("[a-z0-9./-]{1,6}"),
            digest in any::<[u8; 32]>(),
            role in arb_role(),
            stamp in proptest::option::of(any::<i64>()),
        ) {
            let mut id = FunctionId::new(module, name);
            if let Some(version) = version {
                id = id.with_version(version);
            }
            let function = FunctionAddress::new(prefix.as_deref(), &id);
            let entry = function.entry(CacheKey::from_digest(digest));
            let address = match stamp {
                Some(stamp) => entry.archived(role, stamp),
                None => entry.current(role),
            };
            prop_assert_eq!(function.parse(&address.path()), Some(address));
        }
    }
}
