//! # Store Errors
//!
//! Errors raised by repository implementations. Backends translate their
//! native errors (e.g. `sqlx::Error`) into these variants at the crate
//! boundary so the engine never inspects vendor error codes.

use comply_core::ErrorClass;
use thiserror::Error;

/// Error from a repository or transaction operation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Raised when a concurrent
    /// run already inserted the same natural key.
    #[error("duplicate key on {entity}: {detail}")]
    Conflict {
        /// Entity kind being written (`control`, `requirement_map`, ...).
        entity: &'static str,
        /// Backend-provided detail (constraint name, key).
        detail: String,
    },

    /// A row the operation depends on does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind looked up.
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },

    /// A stored value could not be decoded into a domain record.
    #[error("decode error: {0}")]
    Decode(String),

    /// Connectivity, constraint, or any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Classify this error per the engine's propagation policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Conflict { .. } => ErrorClass::TransientConflict,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Decode(_) | Self::Backend(_) => ErrorClass::Fatal,
        }
    }
}

impl From<comply_core::ParseError> for StoreError {
    fn from(err: comply_core::ParseError) -> Self {
        Self::Decode(err.to_string())
    }
}
