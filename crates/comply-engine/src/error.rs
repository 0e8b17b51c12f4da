//! # Engine Errors
//!
//! [`MaterializeError`] is the single error type returned by the
//! orchestrator. Every variant maps onto an [`ErrorClass`]; duplicate-key
//! conflicts are absorbed inside the materializer and only reach this
//! type if a backend raises one outside an insert, in which case they are
//! treated as fatal.

use thiserror::Error;

use comply_core::{ErrorClass, FrameworkId, OrganizationId};
use comply_store::StoreError;

use crate::catalog::{join, CatalogError};
use crate::run::{RunError, RunPhase};

/// Failure of one reconciliation run.
#[derive(Error, Debug)]
pub enum MaterializeError {
    /// The request itself is unusable (e.g. no framework ids).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A fix-up run was requested for an organization with no frameworks.
    #[error("organization {0} has no framework instances to reconcile")]
    NoFrameworks(OrganizationId),

    /// The organization does not exist.
    #[error("organization not found: {0}")]
    OrganizationNotFound(OrganizationId),

    /// Some requested frameworks do not exist or are not published.
    #[error("frameworks not found or not published: {}", join(.0))]
    FrameworksNotFound(Vec<FrameworkId>),

    /// The template catalog could not be loaded.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A write or read failed while applying; the transaction was rolled back.
    #[error("run aborted during {phase}: {source}")]
    Aborted {
        /// Phase the run was in when it failed.
        phase: RunPhase,
        /// Underlying failure.
        #[source]
        source: StoreError,
    },

    /// Storage failure outside a transaction.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The run state machine was driven out of order.
    #[error(transparent)]
    Run(#[from] RunError),
}

impl MaterializeError {
    /// Classify per the engine's propagation policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidInput(_) | Self::NoFrameworks(_) => ErrorClass::InvalidInput,
            Self::OrganizationNotFound(_) | Self::FrameworksNotFound(_) => ErrorClass::NotFound,
            Self::Catalog(e) => fatal_if_conflict(e.class()),
            Self::Aborted { source, .. } => fatal_if_conflict(source.class()),
            Self::Store(e) => fatal_if_conflict(e.class()),
            Self::Run(_) => ErrorClass::Fatal,
        }
    }

    /// Whether the batch driver should count this as a skip rather than a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::NoFrameworks(_))
    }
}

fn fatal_if_conflict(class: ErrorClass) -> ErrorClass {
    match class {
        ErrorClass::TransientConflict => ErrorClass::Fatal,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_errors_are_not_fatal() {
        assert_eq!(
            MaterializeError::InvalidInput("empty".into()).class(),
            ErrorClass::InvalidInput
        );
        assert_eq!(
            MaterializeError::NoFrameworks(OrganizationId::from("org_1")).class(),
            ErrorClass::InvalidInput
        );
        assert_eq!(
            MaterializeError::FrameworksNotFound(vec![FrameworkId::from("iso")]).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            MaterializeError::Catalog(CatalogError::NoVisibleFrameworks(vec![])).class(),
            ErrorClass::InvalidInput
        );
    }

    #[test]
    fn unabsorbed_conflict_is_fatal() {
        let err = MaterializeError::Aborted {
            phase: RunPhase::Applying,
            source: StoreError::Conflict {
                entity: "control",
                detail: "late".into(),
            },
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn aborted_message_names_phase() {
        let err = MaterializeError::Aborted {
            phase: RunPhase::Applying,
            source: StoreError::Backend("connection reset".into()),
        };
        assert_eq!(
            err.to_string(),
            "run aborted during applying: backend error: connection reset"
        );
    }

    #[test]
    fn missing_frameworks_are_listed() {
        let err = MaterializeError::FrameworksNotFound(vec![
            FrameworkId::from("iso27001"),
            FrameworkId::from("hipaa"),
        ]);
        assert_eq!(
            err.to_string(),
            "frameworks not found or not published: iso27001, hipaa"
        );
    }

    #[test]
    fn only_missing_frameworks_count_as_skips() {
        assert!(MaterializeError::NoFrameworks(OrganizationId::from("org_1")).is_skip());
        assert!(!MaterializeError::InvalidInput("x".into()).is_skip());
    }
}
