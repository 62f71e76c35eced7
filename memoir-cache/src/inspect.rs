//! Inspection and maintenance of a memoized function's stored entries.
//!
//! Listing ignores expiry: an expired entry is still listed and loadable,
//! it is only never served to a call.

use memoir_core::{
    is_valid, ArtifactRole, CacheKey, CallArgs, CapturedFailure, CodecKind, Envelope,
    EntryMetadata, InputSnapshot, MemoResult, Outcome,
};
use memoir_storage::{ArtifactAddress, EntryAddress};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::memoized::{decode_outcome, Memoized};

/// Names an entry either by its key or by the call that produced it.
#[derive(Debug, Clone, Copy)]
pub enum EntryRef<'a> {
    Key(CacheKey),
    Args(&'a CallArgs),
}

impl From<CacheKey> for EntryRef<'_> {
    fn from(key: CacheKey) -> Self {
        Self::Key(key)
    }
}

impl<'a> From<&'a CallArgs> for EntryRef<'a> {
    fn from(args: &'a CallArgs) -> Self {
        Self::Args(args)
    }
}

/// One artifact in an entry's history.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub address: ArtifactAddress,
    /// `None` when the header could not be read.
    pub metadata: Option<EntryMetadata>,
    /// Whether the current expiry policy still allows the artifact.
    pub valid: bool,
}

impl Memoized {
    fn entry_address<'a>(&self, entry: impl Into<EntryRef<'a>>) -> MemoResult<EntryAddress> {
        let key = match entry.into() {
            EntryRef::Key(key) => key,
            EntryRef::Args(args) => self.key_for(args)?,
        };
        Ok(self.address.entry(key))
    }

    /// Whether a call would be served from storage right now.
    pub fn is_valid<'a>(&self, entry: impl Into<EntryRef<'a>>) -> MemoResult<bool> {
        let entry = self.entry_address(entry)?;
        let now = self.clock.now();
        for role in [ArtifactRole::Output, ArtifactRole::Exception] {
            let Some(bytes) = self.storage.read_current(&entry, role)? else {
                continue;
            };
            if let Ok(metadata) = Envelope::decode_metadata(&bytes) {
                if is_valid(&metadata, &self.config, now) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn has_input<'a>(&self, entry: impl Into<EntryRef<'a>>) -> MemoResult<bool> {
        self.has(entry, ArtifactRole::Input)
    }

    pub fn has_output<'a>(&self, entry: impl Into<EntryRef<'a>>) -> MemoResult<bool> {
        self.has(entry, ArtifactRole::Output)
    }

    pub fn has_exception<'a>(&self, entry: impl Into<EntryRef<'a>>) -> MemoResult<bool> {
        self.has(entry, ArtifactRole::Exception)
    }

    fn has<'a>(&self, entry: impl Into<EntryRef<'a>>, role: ArtifactRole) -> MemoResult<bool> {
        let entry = self.entry_address(entry)?;
        Ok(self.storage.exists(&entry, role)?)
    }

    /// Keys with a stored input record.
    pub fn list_cached_inputs(&self) -> MemoResult<Vec<CacheKey>> {
        Ok(self.storage.list_keys(&self.address, ArtifactRole::Input)?)
    }

    /// Keys with a stored return value.
    pub fn list_cached_data(&self) -> MemoResult<Vec<CacheKey>> {
        Ok(self.storage.list_keys(&self.address, ArtifactRole::Output)?)
    }

    /// Keys with a stored failure.
    pub fn list_cached_exceptions(&self) -> MemoResult<Vec<CacheKey>> {
        Ok(self.storage.list_keys(&self.address, ArtifactRole::Exception)?)
    }

    /// Current and archived artifacts of `role`, most recent first.
    pub fn history<'a>(
        &self,
        entry: impl Into<EntryRef<'a>>,
        role: ArtifactRole,
    ) -> MemoResult<Vec<StoredArtifact>> {
        let entry = self.entry_address(entry)?;
        let now = self.clock.now();
        let mut artifacts = Vec::new();
        for address in self.storage.history(&entry, role)? {
            let metadata = self
                .storage
                .read(&address)?
                .and_then(|bytes| Envelope::decode_metadata(&bytes).ok());
            let valid = metadata
                .as_ref()
                .map_or(false, |m| is_valid(m, &self.config, now));
            artifacts.push(StoredArtifact {
                address,
                metadata,
                valid,
            });
        }
        Ok(artifacts)
    }

    /// Stored input record. `Ok(None)` when there is none.
    pub fn load_cached_input<'a>(
        &self,
        entry: impl Into<EntryRef<'a>>,
    ) -> MemoResult<Option<InputSnapshot>> {
        let entry = self.entry_address(entry)?;
        let Some(envelope) = self.load_envelope(&entry.current(ArtifactRole::Input))? else {
            return Ok(None);
        };
        let codec = CodecKind::from_id(&envelope.metadata.codec)?;
        Ok(Some(codec.decode(&envelope.payload)?))
    }

    /// Stored return value, regardless of expiry.
    pub fn load_cached_output<'a, T: DeserializeOwned>(
        &self,
        entry: impl Into<EntryRef<'a>>,
    ) -> MemoResult<Option<T>> {
        let entry = self.entry_address(entry)?;
        match self.load_artifact::<T>(&entry.current(ArtifactRole::Output))? {
            Some(Outcome::Returned(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Stored failure, regardless of expiry.
    pub fn load_cached_exception<'a>(
        &self,
        entry: impl Into<EntryRef<'a>>,
    ) -> MemoResult<Option<CapturedFailure>> {
        let entry = self.entry_address(entry)?;
        match self.load_artifact::<serde_json::Value>(&entry.current(ArtifactRole::Exception))? {
            Some(Outcome::Raised(failure)) => Ok(Some(failure)),
            _ => Ok(None),
        }
    }

    /// Decode any output or exception artifact, current or archived.
    pub fn load_artifact<T: DeserializeOwned>(
        &self,
        address: &ArtifactAddress,
    ) -> MemoResult<Option<Outcome<T>>> {
        match self.load_envelope(address)? {
            Some(envelope) => Ok(Some(decode_outcome(&envelope)?)),
            None => Ok(None),
        }
    }

    fn load_envelope(&self, address: &ArtifactAddress) -> MemoResult<Option<Envelope>> {
        match self.storage.read(address)? {
            Some(bytes) => Ok(Some(Envelope::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove_cached_input<'a>(&self, entry: impl Into<EntryRef<'a>>) -> MemoResult<u64> {
        self.remove(entry, ArtifactRole::Input)
    }

    pub fn remove_cached_output<'a>(&self, entry: impl Into<EntryRef<'a>>) -> MemoResult<u64> {
        self.remove(entry, ArtifactRole::Output)
    }

    pub fn remove_cached_exception<'a>(&self, entry: impl Into<EntryRef<'a>>) -> MemoResult<u64> {
        self.remove(entry, ArtifactRole::Exception)
    }

    fn remove<'a>(&self, entry: impl Into<EntryRef<'a>>, role: ArtifactRole) -> MemoResult<u64> {
        let entry = self.entry_address(entry)?;
        let removed = self.storage.delete(&entry, role)?;
        debug!(
            function = %self.function,
            key = %entry.key().short(),
            role = %role,
            removed,
            "Removed artifacts"
        );
        Ok(removed)
    }

    /// Drop every stored failure so the next call for each key re-executes.
    pub fn remove_all_cached_exceptions(&self) -> MemoResult<u64> {
        let mut removed = 0;
        for key in self.list_cached_exceptions()? {
            removed += self.storage.delete(&self.address.entry(key), ArtifactRole::Exception)?;
        }
        debug!(function = %self.function, removed, "Removed all stored failures");
        Ok(removed)
    }

    /// Remove every artifact of one entry.
    pub fn invalidate<'a>(&self, entry: impl Into<EntryRef<'a>>) -> MemoResult<u64> {
        let entry = self.entry_address(entry)?;
        let removed = self.storage.delete_entry(&entry)?;
        debug!(function = %self.function, key = %entry.key().short(), removed, "Invalidated entry");
        Ok(removed)
    }

    /// Remove every artifact of this function.
    pub fn invalidate_all(&self) -> MemoResult<u64> {
        let removed = self.storage.delete_function(&self.address)?;
        debug!(function = %self.function, removed, "Invalidated function");
        Ok(removed)
    }
}
