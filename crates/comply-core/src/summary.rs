//! # Run Summaries
//!
//! Counts of rows created by one reconciliation run, and the result object
//! handed back to direct callers.

use serde::{Deserialize, Serialize};

/// Rows created by a single committed run. Skipped duplicates are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializationSummary {
    pub framework_instances_created: u64,
    pub controls_created: u64,
    pub policies_created: u64,
    pub tasks_created: u64,
    pub requirement_maps_created: u64,
    pub policy_links_created: u64,
    pub task_links_created: u64,
}

impl MaterializationSummary {
    /// Total number of rows and edges created.
    pub fn total(&self) -> u64 {
        self.framework_instances_created
            + self.controls_created
            + self.policies_created
            + self.tasks_created
            + self.requirement_maps_created
            + self.policy_links_created
            + self.task_links_created
    }

    /// Whether the run was a complete no-op.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl std::ops::AddAssign for MaterializationSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.framework_instances_created += rhs.framework_instances_created;
        self.controls_created += rhs.controls_created;
        self.policies_created += rhs.policies_created;
        self.tasks_created += rhs.tasks_created;
        self.requirement_maps_created += rhs.requirement_maps_created;
        self.policy_links_created += rhs.policy_links_created;
        self.task_links_created += rhs.task_links_created;
    }
}

/// Result object returned to the direct-invocation caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub success: bool,
    #[serde(flatten)]
    pub summary: MaterializationSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconcileOutcome {
    /// A successful outcome carrying the run's counts.
    pub fn committed(summary: MaterializationSummary) -> Self {
        Self {
            success: true,
            summary,
            error: None,
        }
    }

    /// A failed outcome. Counts are zero: nothing from the run was kept.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: MaterializationSummary::default(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_flat_camel_case() {
        let outcome = ReconcileOutcome::committed(MaterializationSummary {
            framework_instances_created: 1,
            controls_created: 3,
            ..Default::default()
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["frameworkInstancesCreated"], 1);
        assert_eq!(json["controlsCreated"], 3);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failed_outcome_has_zero_counts() {
        let outcome = ReconcileOutcome::failed("boom");
        assert!(!outcome.success);
        assert!(outcome.summary.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }

    #[test]
    fn total_sums_every_count() {
        let s = MaterializationSummary {
            framework_instances_created: 1,
            controls_created: 2,
            policies_created: 3,
            tasks_created: 4,
            requirement_maps_created: 5,
            policy_links_created: 6,
            task_links_created: 7,
        };
        assert_eq!(s.total(), 28);
        assert!(!s.is_empty());

        let mut acc = MaterializationSummary::default();
        acc += s;
        acc += s;
        assert_eq!(acc.total(), 56);
        assert_eq!(acc.tasks_created, 8);
    }
}
