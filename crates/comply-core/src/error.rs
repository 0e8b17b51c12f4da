//! # Error Taxonomy
//!
//! Every failure the engine can report falls into one of four classes.
//! Crate-level error enums (`StoreError`, `CatalogError`,
//! `MaterializeError`) each expose a `class()` accessor returning an
//! [`ErrorClass`], so callers branch on the class rather than on
//! backend-specific variants.
//!
//! | Class               | Surfaced? | Retried?                      |
//! |---------------------|-----------|-------------------------------|
//! | `InvalidInput`      | yes       | no                            |
//! | `NotFound`          | yes       | no                            |
//! | `TransientConflict` | no        | absorbed as an idempotent skip |
//! | `Fatal`             | yes       | aborts the transaction        |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of an error for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Empty or unknown input; rejected before any write.
    InvalidInput,
    /// A referenced organization or template entity does not exist.
    NotFound,
    /// Duplicate-key race between two idempotent runs.
    TransientConflict,
    /// Anything else. Rolls the run back.
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => f.write_str("invalid_input"),
            Self::NotFound => f.write_str("not_found"),
            Self::TransientConflict => f.write_str("transient_conflict"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

/// Failure to decode a stored enum value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The stored string does not name a known variant.
    #[error("unknown {kind}: {value:?}")]
    UnknownVariant {
        /// Which enum was being parsed.
        kind: &'static str,
        /// The offending value.
        value: String,
    },
}
