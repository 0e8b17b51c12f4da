//! # Engine Telemetry
//!
//! Counters recorded through the `metrics` facade. Without an installed
//! recorder these are no-ops; the CLI installs a Prometheus exporter when
//! asked to.
//!
//! | Name                              | Labels    |
//! |-----------------------------------|-----------|
//! | `comply_reconcile_runs_total`     | `outcome` |
//! | `comply_entities_created_total`   | `entity`  |

use comply_core::{ErrorClass, MaterializationSummary};

use crate::error::MaterializeError;

/// Runs by outcome (`committed`, `skipped`, `invalid_input`, `not_found`,
/// `fatal`, ...).
pub const RECONCILE_RUNS_TOTAL: &str = "comply_reconcile_runs_total";

/// Rows created by committed runs, by entity kind.
pub const ENTITIES_CREATED_TOTAL: &str = "comply_entities_created_total";

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        RECONCILE_RUNS_TOTAL,
        "Reconciliation runs, labelled by outcome"
    );
    metrics::describe_counter!(
        ENTITIES_CREATED_TOTAL,
        "Instance rows and edges created by committed runs, labelled by entity"
    );
}

pub(crate) fn record_committed(summary: &MaterializationSummary) {
    metrics::counter!(RECONCILE_RUNS_TOTAL, "outcome" => "committed").increment(1);
    let counts = [
        ("framework_instance", summary.framework_instances_created),
        ("control", summary.controls_created),
        ("policy", summary.policies_created),
        ("task", summary.tasks_created),
        ("requirement_map", summary.requirement_maps_created),
        ("control_policy", summary.policy_links_created),
        ("control_task", summary.task_links_created),
    ];
    for (entity, n) in counts {
        if n > 0 {
            metrics::counter!(ENTITIES_CREATED_TOTAL, "entity" => entity).increment(n);
        }
    }
}

/// Count a run that ended in `err`.
pub(crate) fn record_failed(err: &MaterializeError) {
    metrics::counter!(RECONCILE_RUNS_TOTAL, "outcome" => outcome_label(err)).increment(1);
}

/// `outcome` label for a run that did not commit. An organization with
/// nothing to reconcile is a skip, not a rejected request.
fn outcome_label(err: &MaterializeError) -> &'static str {
    if err.is_skip() {
        return "skipped";
    }
    match err.class() {
        ErrorClass::InvalidInput => "invalid_input",
        ErrorClass::NotFound => "not_found",
        ErrorClass::TransientConflict => "transient_conflict",
        ErrorClass::Fatal => "fatal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comply_core::{FrameworkId, OrganizationId};
    use comply_store::StoreError;

    #[test]
    fn skips_have_their_own_outcome() {
        let err = MaterializeError::NoFrameworks(OrganizationId::from("org_1"));
        assert_eq!(err.class(), ErrorClass::InvalidInput);
        assert_eq!(outcome_label(&err), "skipped");
    }

    #[test]
    fn failures_are_labelled_by_class() {
        let cases = [
            (MaterializeError::InvalidInput("empty".into()), "invalid_input"),
            (
                MaterializeError::FrameworksNotFound(vec![FrameworkId::from("gdpr")]),
                "not_found",
            ),
            (
                MaterializeError::Store(StoreError::Backend("connection reset".into())),
                "fatal",
            ),
        ];
        for (err, label) in cases {
            assert_eq!(outcome_label(&err), label, "{err}");
        }
    }
}
