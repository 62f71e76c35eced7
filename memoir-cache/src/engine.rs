//! Cache engine: shared storage, defaults and clock for memoized functions.

use std::sync::Arc;

use memoir_core::{EngineSettings, FunctionId, MemoConfig, MemoResult};
use memoir_storage::{BlobStore, StorageAdapter, StorageLocation};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::memoized::Memoized;

/// Entry point: binds functions to a storage backend.
///
/// The engine is cheap to clone and holds no global state; two engines over
/// the same location see the same entries.
///
/// # Example
///
/// ```
/// use memoir_cache::{CacheEngine, CallError};
/// use memoir_core::{CallArgs, CapturedFailure, FunctionId};
/// use memoir_storage::MemoryBlobStore;
/// use std::sync::Arc;
///
/// let engine = CacheEngine::new(Arc::new(MemoryBlobStore::new()));
/// let square = engine.memoize(FunctionId::new("demo", "square"));
///
/// let n = 12_u64;
/// let first: Result<u64, CallError<CapturedFailure>> =
///     square.call(&CallArgs::new().arg(&n), || Ok(n * n));
/// let again: Result<u64, CallError<CapturedFailure>> =
///     square.call(&CallArgs::new().arg(&n), || unreachable!());
/// assert_eq!(first.ok(), again.ok());
/// ```
#[derive(Clone)]
pub struct CacheEngine {
    storage: StorageAdapter,
    defaults: MemoConfig,
    clock: Arc<dyn Clock>,
}

impl CacheEngine {
    /// Engine over an already-open store, with default configuration.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            storage: StorageAdapter::new(store),
            defaults: MemoConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Open the configured location and apply the configured defaults.
    pub fn from_settings(settings: &EngineSettings) -> MemoResult<Self> {
        settings.defaults.validate()?;
        let location: StorageLocation = settings.storage_location.parse()?;
        let store = location.open()?;
        info!(
            location = %location,
            backend = store.backend_name(),
            "Cache engine initialized"
        );
        Ok(Self::new(store).with_defaults(settings.defaults.clone()))
    }

    /// [`from_settings`](Self::from_settings) with [`EngineSettings::from_env`].
    pub fn from_env() -> MemoResult<Self> {
        Self::from_settings(&EngineSettings::from_env())
    }

    /// Replace the default configuration handed to [`memoize`](Self::memoize).
    pub fn with_defaults(mut self, defaults: MemoConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn defaults(&self) -> &MemoConfig {
        &self.defaults
    }

    pub fn storage(&self) -> &StorageAdapter {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Memoize a function with the engine defaults.
    pub fn memoize(&self, function: FunctionId) -> Memoized {
        Memoized::new(
            function,
            self.defaults.clone(),
            self.storage.clone(),
            self.clock.clone(),
        )
    }

    /// Memoize a function with its own configuration.
    pub fn memoize_with(&self, function: FunctionId, config: MemoConfig) -> MemoResult<Memoized> {
        config.validate()?;
        Ok(Memoized::new(
            function,
            config,
            self.storage.clone(),
            self.clock.clone(),
        ))
    }

    /// Stored function directories under `prefix`.
    pub fn functions(&self, prefix: Option<&str>) -> MemoResult<Vec<String>> {
        Ok(self.storage.list_functions(prefix)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoir_core::{ConfigError, MemoError};
    use memoir_storage::MemoryBlobStore;
    use std::time::Duration;

    #[test]
    fn test_memoize_with_validates() {
        let engine = CacheEngine::new(Arc::new(MemoryBlobStore::new()));
        let bad = MemoConfig::default().with_ttl(Duration::ZERO);
        let err = engine
            .memoize_with(FunctionId::new("m", "f"), bad)
            .err()
            .expect("zero ttl must be rejected");
        assert!(matches!(err, MemoError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_from_settings_memory() {
        let settings = EngineSettings::default().with_storage_location("memory://");
        let engine = CacheEngine::from_settings(&settings).unwrap();
        assert_eq!(engine.storage().backend_name(), "memory");
        assert!(engine.functions(None).unwrap().is_empty());
    }

    #[test]
    fn test_from_settings_rejects_unknown_scheme() {
        let settings = EngineSettings::default().with_storage_location("gs://bucket");
        assert!(matches!(
            CacheEngine::from_settings(&settings),
            Err(MemoError::Config(ConfigError::UnsupportedLocation { .. }))
        ));
    }

    #[test]
    fn test_memoize_uses_defaults() {
        let defaults = MemoConfig::default().with_prefix("nightly");
        let engine = CacheEngine::new(Arc::new(MemoryBlobStore::new())).with_defaults(defaults.clone());
        let memo = engine.memoize(FunctionId::new("m", "f"));
        assert_eq!(memo.config(), &defaults);
        assert_eq!(memo.storage_dir(), "nightly/m.f/");
    }
}
