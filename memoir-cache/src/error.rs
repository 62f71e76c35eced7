//! Errors at the orchestrator boundary.

use std::fmt;

use memoir_core::MemoError;

/// Error returned by a memoized call.
///
/// `Raised` and `Replayed` carry the wrapped function's own error type, so
/// callers handle a replayed failure exactly like a live one; the variant
/// only tells them where it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError<E> {
    /// The function ran and failed.
    Raised(E),
    /// A stored failure was raised again without running the function.
    Replayed(E),
    /// The engine could not serve the call.
    Engine(MemoError),
}

impl<E> CallError<E> {
    /// The function's error, live or replayed.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Raised(e) | Self::Replayed(e) => Some(e),
            Self::Engine(_) => None,
        }
    }

    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Raised(e) | Self::Replayed(e) => Some(e),
            Self::Engine(_) => None,
        }
    }

    pub fn is_replayed(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }

    pub fn engine_error(&self) -> Option<&MemoError> {
        match self {
            Self::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<MemoError> for CallError<E> {
    fn from(e: MemoError) -> Self {
        Self::Engine(e)
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(e) => write!(f, "{e}"),
            Self::Replayed(e) => write!(f, "{e} (replayed from cache)"),
            Self::Engine(e) => write!(f, "memoization failed: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CallError<E> {}
