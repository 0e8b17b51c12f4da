//! # Batch Driver
//!
//! Fans reconciliation out over many organizations. Organizations are
//! processed in fixed-size chunks; the runs inside a chunk execute
//! concurrently and the next chunk starts once the current one has
//! finished, which bounds how many transactions are open at once.
//!
//! Every organization is an independent run. A failure is recorded
//! against that organization and processing continues. Organizations with
//! no framework instances are counted as skipped.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use comply_core::{ErrorClass, MaterializationSummary, OrganizationId};
use comply_store::{Database, StoreError};

use crate::orchestrator::{Orchestrator, ReconcileRequest};

/// Default number of organizations reconciled concurrently.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// One organization's failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationFailure {
    pub organization_id: OrganizationId,
    pub error: String,
    pub class: ErrorClass,
}

/// Aggregate result of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total_processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failures: Vec<OrganizationFailure>,
    /// Sum of what the committed runs created.
    pub created: MaterializationSummary,
}

impl BatchReport {
    /// Whether any organization failed.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Runs fix-up reconciliation for many organizations.
#[derive(Debug)]
pub struct BatchDriver<D> {
    orchestrator: Arc<Orchestrator<D>>,
    batch_size: usize,
}

impl<D: Database> BatchDriver<D> {
    /// A driver reconciling `batch_size` organizations at a time. A size of
    /// zero is treated as one.
    pub fn new(orchestrator: Arc<Orchestrator<D>>, batch_size: usize) -> Self {
        Self {
            orchestrator,
            batch_size: batch_size.max(1),
        }
    }

    /// Organizations per chunk.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Reconcile every organization in the database.
    pub async fn run_all(&self) -> Result<BatchReport, StoreError> {
        let organizations = self.orchestrator.database().organization_ids().await?;
        tracing::info!(
            organizations = organizations.len(),
            batch_size = self.batch_size,
            "batch reconciliation starting"
        );
        Ok(self.run_for(&organizations).await)
    }

    /// Reconcile the given organizations.
    pub async fn run_for(&self, organizations: &[OrganizationId]) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, chunk) in organizations.chunks(self.batch_size).enumerate() {
            let runs = chunk.iter().map(|organization_id| {
                let request = ReconcileRequest::fix_organization(organization_id.clone());
                async move { (organization_id, self.orchestrator.reconcile(request).await) }
            });

            for (organization_id, result) in join_all(runs).await {
                report.total_processed += 1;
                match result {
                    Ok(summary) => {
                        report.succeeded += 1;
                        report.created += summary;
                    }
                    Err(e) if e.is_skip() => {
                        tracing::debug!(organization_id = %organization_id, "skipped: {e}");
                        report.skipped += 1;
                    }
                    Err(e) => {
                        tracing::error!(
                            organization_id = %organization_id,
                            class = %e.class(),
                            "reconciliation failed: {e}"
                        );
                        report.failures.push(OrganizationFailure {
                            organization_id: organization_id.clone(),
                            error: e.to_string(),
                            class: e.class(),
                        });
                    }
                }
            }
            tracing::debug!(chunk = index, size = chunk.len(), "batch chunk finished");
        }

        tracing::info!(
            total = report.total_processed,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failures.len(),
            "batch reconciliation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comply_core::FrameworkId;
    use comply_store::{CatalogSeed, MemoryDatabase};

    const SEED: &str = r#"
organizations: [org_a, org_b, org_c]
frameworks:
  - id: soc2
    name: SOC 2
    version: "2017"
    requirements:
      - { id: cc1, identifier: CC1.1 }
control_templates:
  - { id: ct_a, name: Access, requirements: [cc1] }
"#;

    async fn driver(batch_size: usize) -> BatchDriver<MemoryDatabase> {
        let db = MemoryDatabase::from_seed(&CatalogSeed::from_yaml_str(SEED).unwrap());
        let orch = Arc::new(Orchestrator::new(db));
        for org in ["org_a", "org_b"] {
            orch.reconcile(ReconcileRequest::add_frameworks(
                OrganizationId::from(org),
                [FrameworkId::from("soc2")],
            ))
            .await
            .unwrap();
        }
        BatchDriver::new(orch, batch_size)
    }

    #[tokio::test]
    async fn organizations_without_frameworks_are_skipped() {
        let report = driver(2).await.run_all().await.unwrap();
        assert_eq!(report.total_processed, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.skipped, 1);
        assert!(!report.has_failures());
        assert!(report.created.is_empty());
    }

    #[tokio::test]
    async fn failures_are_isolated_per_organization() {
        let driver = driver(1).await;
        let report = driver
            .run_for(&[
                OrganizationId::from("org_a"),
                OrganizationId::from("org_ghost"),
                OrganizationId::from("org_b"),
            ])
            .await;
        assert_eq!(report.total_processed, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].organization_id.as_str(), "org_ghost");
        assert_eq!(report.failures[0].class, ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn empty_input_is_an_empty_report() {
        let report = driver(3).await.run_for(&[]).await;
        assert_eq!(report, BatchReport::default());
    }

    #[test]
    fn report_serializes_camel_case() {
        let json = serde_json::to_value(BatchReport::default()).unwrap();
        assert_eq!(json["totalProcessed"], 0);
        assert!(json["failures"].as_array().unwrap().is_empty());
    }
}
