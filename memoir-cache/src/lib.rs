//! memoir Cache - Function-Level Memoization Engine
//!
//! Wraps pure, deterministic functions so that a repeated call with the same
//! canonical arguments is answered from durable storage instead of being
//! executed again. Both outcomes are persisted: a stored return value is
//! returned, a stored failure is raised again.
//!
//! ```text
//! CacheEngine ──memoize──► Memoized ──call──► key ──► StorageAdapter ──► BlobStore
//! ```
//!
//! Entries stay inspectable after the fact: see the listing, loading and
//! removal methods on [`Memoized`].

pub mod clock;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod memoized;
pub mod stats;
pub mod telemetry;

pub use clock::{Clock, SystemClock};
pub use engine::CacheEngine;
pub use error::CallError;
pub use inspect::{EntryRef, StoredArtifact};
pub use memoized::Memoized;
pub use stats::EngineStats;
pub use telemetry::{init_tracing, LogFormat, TelemetryError};
