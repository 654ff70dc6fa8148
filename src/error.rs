use thiserror::Error;

use crate::types::TypeCode;

/// Crate-wide result alias.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure kinds surfaced by the store.
///
/// Structural errors (bad paths, missing fields) surface where the lookup
/// happens, type errors at the read/write boundary, and lifetime errors
/// (stale handles, disposed storages) terminate the operation immediately.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("type mismatch: {found} where {expected} was expected ({detail})")]
    TypeMismatch {
        expected: TypeCode,
        found: TypeCode,
        detail: String,
    },

    #[error("stale handle: container {id} changed since the handle was taken")]
    StaleHandle { id: u64 },

    #[error("disposed: {0}")]
    Disposed(String),

    #[error("malformed path: {0}")]
    MalformedPath(String),

    #[error("kind change: {0}")]
    KindChange(String),

    #[error("index {index} out of range 0..{len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("recursion depth {0} exceeded")]
    DepthExceeded(usize),

    #[error("bad format: {0}")]
    BadFormat(String),

    #[error("pool violation: buffer of {got} bytes handed to a pool of stride {stride}")]
    PoolViolation { stride: usize, got: usize },
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound(what.into())
    }

    pub fn type_mismatch(expected: TypeCode, found: TypeCode, detail: impl Into<String>) -> Self {
        StoreError::TypeMismatch {
            expected,
            found,
            detail: detail.into(),
        }
    }

    /// True for errors a reader can branch on locally (missing fields).
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
