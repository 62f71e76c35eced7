//! Memoized function handle and the call lifecycle.
//!
//! Every call runs the same state machine:
//!
//! ```text
//! DERIVE KEY ──► CHECK ──► HIT ───────────► return stored value
//!                  │
//!                  ├─────► REPLAY ────────► raise stored failure
//!                  │
//!                  └─────► MISS ──► EXECUTE ──► PERSIST ──► return / raise
//! ```
//!
//! CHECK reads the output and exception artifacts of the key and serves the
//! newest one that the current expiry policy still allows. Read failures
//! count as a miss; write failures in PERSIST are logged and skipped, so the
//! caller always gets the live result of an execution.

use std::future::Future;
use std::sync::Arc;

use memoir_core::{
    derive_key, is_valid, ArtifactRole, CacheKey, CallArgs, CapturedFailure, CodecKind,
    DeserializationError, Envelope, EntryMetadata, FunctionId, MemoConfig, MemoResult, Outcome,
    ReplayableError,
};
use memoir_storage::{ArtifactAddress, EntryAddress, FunctionAddress, StorageAdapter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::CallError;
use crate::stats::{EngineStats, StatsRecorder};

/// A function bound to a cache engine.
///
/// The handle carries its own configuration snapshot. Cloning it, or deriving
/// a variant with [`with_config`](Self::with_config), shares the statistics
/// counters.
#[derive(Clone)]
pub struct Memoized {
    pub(crate) function: FunctionId,
    pub(crate) config: MemoConfig,
    pub(crate) address: FunctionAddress,
    pub(crate) storage: StorageAdapter,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) stats: Arc<StatsRecorder>,
}

enum Step<T, E> {
    Served(Result<T, CallError<E>>),
    Execute(EntryAddress),
}

impl Memoized {
    pub(crate) fn new(
        function: FunctionId,
        config: MemoConfig,
        storage: StorageAdapter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let address = FunctionAddress::new(config.prefix.as_deref(), &function);
        Self {
            function,
            config,
            address,
            storage,
            clock,
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    pub fn function(&self) -> &FunctionId {
        &self.function
    }

    pub fn config(&self) -> &MemoConfig {
        &self.config
    }

    /// Directory holding this function's entries, relative to the store root.
    pub fn storage_dir(&self) -> String {
        self.address.dir()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }

    /// Same function, different configuration.
    pub fn with_config(&self, config: MemoConfig) -> MemoResult<Self> {
        config.validate()?;
        Ok(Self {
            address: FunctionAddress::new(config.prefix.as_deref(), &self.function),
            config,
            function: self.function.clone(),
            storage: self.storage.clone(),
            clock: self.clock.clone(),
            stats: self.stats.clone(),
        })
    }

    /// Cache key of a call under this handle's configuration.
    pub fn key_for(&self, args: &CallArgs) -> MemoResult<CacheKey> {
        Ok(derive_key(&self.function, args, &self.config)?)
    }

    /// Run `f` through the cache.
    ///
    /// `args` must describe every input `f` depends on; the closure itself
    /// is only run on a miss.
    pub fn call<T, E, F>(&self, args: &CallArgs, f: F) -> Result<T, CallError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: ReplayableError,
        F: FnOnce() -> Result<T, E>,
    {
        let entry = match self.check::<T, E>(args)? {
            Step::Served(result) => return result,
            Step::Execute(entry) => entry,
        };
        self.finish(&entry, f())
    }

    /// Async variant of [`call`](Self::call). The future is only created and
    /// awaited on a miss.
    pub async fn call_async<T, E, F, Fut>(&self, args: &CallArgs, f: F) -> Result<T, CallError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: ReplayableError,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let entry = match self.check::<T, E>(args)? {
            Step::Served(result) => return result,
            Step::Execute(entry) => entry,
        };
        let result = f().await;
        self.finish(&entry, result)
    }

    /// Execute and persist without consulting stored entries.
    pub fn recompute<T, E, F>(&self, args: &CallArgs, f: F) -> Result<T, CallError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: ReplayableError,
        F: FnOnce() -> Result<T, E>,
    {
        let key = self.key_for(args)?;
        let entry = self.address.entry(key);
        debug!(function = %self.function, key = %key.short(), "Forced recompute");
        self.prepare(&entry, args);
        self.finish(&entry, f())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn check<T, E>(&self, args: &CallArgs) -> Result<Step<T, E>, CallError<E>>
    where
        T: DeserializeOwned,
        E: ReplayableError,
    {
        let key = self.key_for(args)?;
        let entry = self.address.entry(key);

        match self.lookup::<T>(&entry)? {
            Some(Outcome::Returned(value)) => {
                self.stats.hit();
                debug!(function = %self.function, key = %key.short(), "Cache hit");
                return Ok(Step::Served(Ok(value)));
            }
            Some(Outcome::Raised(failure)) => match E::replay(&failure) {
                Ok(error) => {
                    self.stats.replayed();
                    debug!(
                        function = %self.function,
                        key = %key.short(),
                        failure = %failure,
                        "Replaying stored failure"
                    );
                    return Ok(Step::Served(Err(CallError::Replayed(error))));
                }
                Err(e) => self.degrade(e, &entry.current(ArtifactRole::Exception))?,
            },
            None => {}
        }

        self.stats.miss();
        debug!(function = %self.function, key = %key.short(), "Cache miss");
        self.prepare(&entry, args);
        Ok(Step::Execute(entry))
    }

    /// Newest servable outcome for an entry, if any.
    pub(crate) fn lookup<T: DeserializeOwned>(
        &self,
        entry: &EntryAddress,
    ) -> MemoResult<Option<Outcome<T>>> {
        let now = self.clock.now();
        let mut newest: Option<Envelope> = None;

        for role in [ArtifactRole::Output, ArtifactRole::Exception] {
            let Some(envelope) = self.read_envelope(entry, role)? else {
                continue;
            };
            if !is_valid(&envelope.metadata, &self.config, now) {
                debug!(
                    function = %self.function,
                    key = %entry.key().short(),
                    role = %role,
                    written_at = %envelope.metadata.written_at,
                    "Stored artifact expired"
                );
                continue;
            }
            let newer = newest
                .as_ref()
                .map_or(true, |n| envelope.metadata.written_at > n.metadata.written_at);
            if newer {
                newest = Some(envelope);
            }
        }

        let Some(envelope) = newest else {
            return Ok(None);
        };
        match decode_outcome::<T>(&envelope) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                let address = entry.current(envelope.metadata.role);
                self.degrade(e, &address).map(|()| None)
            }
        }
    }

    /// Read and unwrap one current artifact. Storage failures are a miss.
    fn read_envelope(
        &self,
        entry: &EntryAddress,
        role: ArtifactRole,
    ) -> MemoResult<Option<Envelope>> {
        let address = entry.current(role);
        let bytes = match self.storage.read(&address) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.stats.read_failed();
                warn!(
                    function = %self.function,
                    path = %address,
                    error = %e,
                    "Storage read failed, treating as miss"
                );
                return Ok(None);
            }
        };
        match Envelope::decode(&bytes) {
            Ok(envelope) if envelope.metadata.key == entry.key() && envelope.metadata.role == role => {
                Ok(Some(envelope))
            }
            Ok(_) => {
                let e = DeserializationError::CorruptEnvelope {
                    reason: "metadata does not match artifact address".to_string(),
                };
                self.degrade(e, &address).map(|()| None)
            }
            Err(e) => self.degrade(e, &address).map(|()| None),
        }
    }

    /// Downgrade a decode failure to a miss, unless configured to surface it.
    fn degrade(&self, e: DeserializationError, address: &ArtifactAddress) -> MemoResult<()> {
        self.stats.read_failed();
        if self.config.surface_deserialization_errors {
            return Err(e.into());
        }
        warn!(
            function = %self.function,
            path = %address,
            error = %e,
            "Stored artifact unreadable, treating as miss"
        );
        Ok(())
    }

    /// Work done between a miss and execution.
    fn prepare(&self, entry: &EntryAddress, args: &CallArgs) {
        if self.config.persist_inputs {
            let snapshot = args.input_snapshot(&self.function.qualified_name());
            self.persist(entry, ArtifactRole::Input, &snapshot);
        }
    }

    fn finish<T, E>(&self, entry: &EntryAddress, result: Result<T, E>) -> Result<T, CallError<E>>
    where
        T: Serialize,
        E: ReplayableError,
    {
        self.stats.executed();
        match result {
            Ok(value) => {
                debug!(function = %self.function, key = %entry.key().short(), "Function returned");
                self.persist(entry, ArtifactRole::Output, &value);
                Ok(value)
            }
            Err(error) => {
                let failure = error.capture();
                debug!(
                    function = %self.function,
                    key = %entry.key().short(),
                    failure = %failure,
                    "Function raised"
                );
                self.persist(entry, ArtifactRole::Exception, &failure);
                Err(CallError::Raised(error))
            }
        }
    }

    fn persist<V: Serialize + ?Sized>(&self, entry: &EntryAddress, role: ArtifactRole, value: &V) {
        if let Err(e) = self.try_persist(entry, role, value) {
            self.stats.write_failed();
            warn!(
                function = %self.function,
                key = %entry.key().short(),
                role = %role,
                error = %e,
                "Failed to persist artifact, continuing without it"
            );
        }
    }

    fn try_persist<V: Serialize + ?Sized>(
        &self,
        entry: &EntryAddress,
        role: ArtifactRole,
        value: &V,
    ) -> MemoResult<()> {
        let (codec, payload) = self.config.codec_for(role).encode(value)?;
        let metadata = EntryMetadata::new(
            entry.key(),
            self.address.function(),
            role,
            codec.id(),
            self.clock.now(),
            self.config.expiry,
            &payload,
        );
        let bytes = Envelope::new(metadata, payload).encode()?;
        self.storage
            .write(entry, role, &bytes, self.config.write_mode)?;
        debug!(
            function = %self.function,
            key = %entry.key().short(),
            role = %role,
            codec = %codec,
            "Persisted artifact"
        );
        Ok(())
    }
}

/// Decode the payload of an output or exception artifact.
pub(crate) fn decode_outcome<T: DeserializeOwned>(
    envelope: &Envelope,
) -> Result<Outcome<T>, DeserializationError> {
    let codec = CodecKind::from_id(&envelope.metadata.codec)?;
    match envelope.metadata.role {
        ArtifactRole::Output => codec.decode::<T>(&envelope.payload).map(Outcome::Returned),
        ArtifactRole::Exception => codec
            .decode::<CapturedFailure>(&envelope.payload)
            .map(Outcome::Raised),
        ArtifactRole::Input => Err(DeserializationError::CorruptEnvelope {
            reason: "input artifacts carry no outcome".to_string(),
        }),
    }
}
