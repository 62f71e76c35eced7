//! memoir Test Utilities
//!
//! Shared test infrastructure for the memoir workspace:
//! - A manually driven clock for expiry tests
//! - A blob store wrapper with switchable failures
//! - Execution counters for wrapped functions
//! - Proptest generators for keys, arguments and expiry modes

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use memoir_cache::{CacheEngine, CallError, Clock, EngineStats, Memoized};
pub use memoir_core::{
    ArtifactRole, CacheKey, CallArgs, CapturedFailure, ExpiryMode, FunctionId, MemoConfig,
    StorageError, Timestamp, WriteMode,
};
pub use memoir_storage::{BlobStore, MemoryBlobStore};

use chrono::{TimeZone, Utc};

// ============================================================================
// CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn at(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock starting at 2024-01-01T00:00:00Z, a Monday.
    pub fn new() -> Self {
        Self::at(epoch())
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += step;
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Start of the manual clock.
pub fn epoch() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Blob store wrapper whose reads and writes can be switched to fail.
///
/// Failed reads report a timeout, failed writes an I/O error, the two
/// failures a remote store typically produces.
pub struct FlakyBlobStore {
    inner: Arc<dyn BlobStore>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    failed_ops: AtomicUsize,
}

impl FlakyBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            failed_ops: AtomicUsize::new(0),
        }
    }

    /// Healthy store over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Operations rejected so far.
    pub fn failed_ops(&self) -> usize {
        self.failed_ops.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<dyn BlobStore> {
        &self.inner
    }

    fn check_read(&self, path: &str) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            self.failed_ops.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Timeout {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    fn check_write(&self, path: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.failed_ops.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Io {
                path: path.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        Ok(())
    }
}

impl BlobStore for FlakyBlobStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_read(path)?;
        self.inner.get(path)
    }

    fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.check_write(path)?;
        self.inner.put(path, bytes)
    }

    fn delete(&self, path: &str) -> Result<bool, StorageError> {
        self.check_write(path)?;
        self.inner.delete(path)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.check_read(prefix)?;
        self.inner.list(prefix)
    }
}

// ============================================================================
// COUNTERS
// ============================================================================

/// Counts executions of a wrapped function.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    count: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution.
    pub fn tick(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for memoir types.

    use super::*;
    use proptest::prelude::*;

    /// Timestamp between 2020 and 2030, whole seconds.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        any::<[u8; 32]>().prop_map(CacheKey::from_digest)
    }

    /// Function identity with a non-empty module and name.
    pub fn arb_function_id() -> impl Strategy<Value = FunctionId> {
        ("[a-z][a-z0-9_]{0,8}(::[a-z][a-z0-9_]{0,8}){0,2}", "[a-z][a-z0-9_]{0,12}")
            .prop_map(|(module, name)| FunctionId::new(module, name))
    }

    pub fn arb_expiry_mode() -> impl Strategy<Value = ExpiryMode> {
        prop_oneof![
            Just(ExpiryMode::Never),
            (1u64..86_400).prop_map(|secs| ExpiryMode::Ttl(Duration::from_secs(secs))),
            prop_oneof![
                Just(memoir_core::Period::Hourly),
                Just(memoir_core::Period::Daily),
                Just(memoir_core::Period::Weekly),
                Just(memoir_core::Period::Monthly),
            ]
            .prop_map(ExpiryMode::Periodic),
            arb_timestamp().prop_map(ExpiryMode::Until),
        ]
    }

    /// Plain JSON-representable argument values.
    pub fn arb_arg_value() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(2, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|m| {
                    serde_json::Value::Object(m.into_iter().collect())
                }),
            ]
        })
    }

    /// Positional and keyword arguments, as raw values.
    pub fn arb_call_parts(
    ) -> impl Strategy<Value = (Vec<serde_json::Value>, Vec<(String, serde_json::Value)>)> {
        (
            prop::collection::vec(arb_arg_value(), 0..4),
            prop::collection::vec(("[a-z]{1,8}", arb_arg_value()), 0..4),
        )
    }

    /// Build call arguments from generated parts.
    pub fn call_args_from(
        positional: &[serde_json::Value],
        keyword: &[(String, serde_json::Value)],
    ) -> CallArgs {
        let args = positional.iter().fold(CallArgs::new(), |args, v| args.arg(v));
        keyword
            .iter()
            .fold(args, |args, (name, v)| args.kwarg(name.clone(), v))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built engines and stores for common scenarios.

    use super::*;

    /// Engine over a fresh in-memory store, driven by a manual clock.
    pub fn memory_engine() -> (CacheEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let engine = CacheEngine::new(Arc::new(MemoryBlobStore::new())).with_clock(clock.clone());
        (engine, clock)
    }

    /// Engine over a flaky in-memory store, driven by a manual clock.
    pub fn flaky_engine() -> (CacheEngine, Arc<FlakyBlobStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(FlakyBlobStore::in_memory());
        let engine = CacheEngine::new(store.clone()).with_clock(clock.clone());
        (engine, store, clock)
    }

    /// Overwrite the stored bytes of a current artifact.
    pub fn clobber_artifact(
        engine: &CacheEngine,
        memo: &Memoized,
        key: CacheKey,
        role: ArtifactRole,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        let path = format!("{}{}/{}", memo.storage_dir(), key.to_hex(), role.file_name());
        engine.storage().store().put(&path, bytes)
    }
}
