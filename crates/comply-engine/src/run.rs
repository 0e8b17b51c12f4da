//! # Reconciliation Run Lifecycle
//!
//! Every orchestrator invocation is tracked by a [`Run`] that moves through
//! a small state machine:
//!
//! ```text
//! Planning ──▶ Applying ──▶ Committed
//!     │            │
//!     └────────────┴──▶ Aborted
//! ```
//!
//! `Committed` and `Aborted` are terminal. No transaction is open while
//! the run is in `Planning`; exactly one is open while it is in
//! `Applying`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use comply_core::OrganizationId;

// ─── Phase ───────────────────────────────────────────────────────────

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Validating the request and resolving target frameworks.
    Planning,
    /// Inside the run's transaction, writing the diff.
    Applying,
    /// Transaction committed (terminal).
    Committed,
    /// Rolled back or rejected (terminal).
    Aborted,
}

impl RunPhase {
    /// Whether this phase is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (Self::Planning, Self::Applying)
                | (Self::Planning, Self::Aborted)
                | (Self::Applying, Self::Committed)
                | (Self::Applying, Self::Aborted)
        )
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Applying => "applying",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Illegal lifecycle transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// Attempted transition is not valid from the current phase.
    #[error("invalid run transition: {from} -> {to}")]
    InvalidTransition {
        /// Current phase.
        from: RunPhase,
        /// Attempted target phase.
        to: RunPhase,
    },
}

// ─── Run ─────────────────────────────────────────────────────────────

/// Record of a single phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: RunPhase,
    pub to: RunPhase,
    pub at: DateTime<Utc>,
}

/// One reconciliation run for one organization.
#[derive(Debug, Clone)]
pub struct Run {
    organization_id: OrganizationId,
    phase: RunPhase,
    transitions: Vec<PhaseTransition>,
}

impl Run {
    /// Start a run in [`RunPhase::Planning`].
    pub fn start(organization_id: OrganizationId) -> Self {
        tracing::debug!(organization_id = %organization_id, "run planning");
        Self {
            organization_id,
            phase: RunPhase::Planning,
            transitions: Vec::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Organization this run reconciles.
    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    /// Phase changes so far, oldest first.
    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    /// Planning → Applying.
    pub fn begin_applying(&mut self) -> Result<(), RunError> {
        self.advance(RunPhase::Applying)
    }

    /// Applying → Committed.
    pub fn commit(&mut self) -> Result<(), RunError> {
        self.advance(RunPhase::Committed)
    }

    /// Planning or Applying → Aborted. Returns the phase the run failed in.
    pub fn abort(&mut self) -> Result<RunPhase, RunError> {
        let failed_in = self.phase;
        self.advance(RunPhase::Aborted)?;
        Ok(failed_in)
    }

    fn advance(&mut self, to: RunPhase) -> Result<(), RunError> {
        if !self.phase.can_transition_to(to) {
            return Err(RunError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        tracing::debug!(
            organization_id = %self.organization_id,
            from = %self.phase,
            to = %to,
            "run phase change"
        );
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            at: Utc::now(),
        });
        self.phase = to;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> Run {
        Run::start(OrganizationId::from("org_1"))
    }

    #[test]
    fn happy_path_reaches_committed() {
        let mut run = run();
        run.begin_applying().unwrap();
        run.commit().unwrap();
        assert_eq!(run.phase(), RunPhase::Committed);
        assert!(run.phase().is_terminal());
        assert_eq!(run.transitions().len(), 2);
        assert_eq!(run.transitions()[0].from, RunPhase::Planning);
    }

    #[test]
    fn abort_reports_failing_phase() {
        let mut planning = run();
        assert_eq!(planning.abort().unwrap(), RunPhase::Planning);

        let mut applying = run();
        applying.begin_applying().unwrap();
        assert_eq!(applying.abort().unwrap(), RunPhase::Applying);
        assert_eq!(applying.phase(), RunPhase::Aborted);
    }

    #[test]
    fn cannot_commit_without_applying() {
        let mut run = run();
        assert_eq!(
            run.commit(),
            Err(RunError::InvalidTransition {
                from: RunPhase::Planning,
                to: RunPhase::Committed,
            })
        );
    }

    #[test]
    fn terminal_phases_are_final() {
        let mut run = run();
        run.begin_applying().unwrap();
        run.commit().unwrap();
        assert!(run.abort().is_err());
        assert!(run.begin_applying().is_err());
    }
}
