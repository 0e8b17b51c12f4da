//! # Reconciliation Orchestrator
//!
//! Drives one organization through the run lifecycle (see [`crate::run`]).
//!
//! ## Planning
//!
//! Validates the request with no transaction open:
//!
//! - an empty framework list is [`MaterializeError::InvalidInput`];
//! - an unknown organization is [`MaterializeError::OrganizationNotFound`];
//! - zero visible frameworks among the requested ids is
//!   [`CatalogError::NoVisibleFrameworks`] (invalid input), and a partial
//!   match is [`MaterializeError::FrameworksNotFound`];
//! - a fix-up run for an organization with no framework instances is
//!   [`MaterializeError::NoFrameworks`].
//!
//! ## Applying
//!
//! Opens exactly one transaction. The template catalog, the existing
//! instance rows, and every write are issued against it, so the diff is
//! computed from the same snapshot the writes land in. Any failure rolls
//! the transaction back. Dropping the future before commit drops the
//! transaction, which discards its writes as well.
//!
//! ## Committed
//!
//! After commit the orchestrator records metrics, emits one audit event,
//! and, when anything was created, tells the cache invalidator which views
//! are stale.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use comply_core::{FrameworkId, MaterializationSummary, OrganizationId, ReconcileOutcome};
use comply_store::{Database, StoreError, Transaction};

use crate::catalog::{CatalogError, TemplateCatalog};
use crate::diff::{resolve, ExistingState, MaterializationPlan};
use crate::error::MaterializeError;
use crate::events::{
    AuditSink, CacheInvalidator, CacheScope, MaterializationEvent, TracingAuditSink,
    TracingCacheInvalidator,
};
use crate::materialize::Materializer;
use crate::run::{Run, RunPhase};
use crate::telemetry;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Which frameworks a run targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "frameworkIds", rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Adopt exactly these frameworks (and fill any gaps in them).
    AddFrameworks(Vec<FrameworkId>),
    /// Re-derive every framework the organization already has and add
    /// whatever the current catalog says is missing.
    FixOrganization,
}

impl ReconcileMode {
    /// Short name used in logs and events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddFrameworks(_) => "add_frameworks",
            Self::FixOrganization => "fix_organization",
        }
    }
}

/// Input to one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub organization_id: OrganizationId,
    #[serde(flatten)]
    pub mode: ReconcileMode,
}

impl ReconcileRequest {
    /// Add `framework_ids` to `organization_id`.
    pub fn add_frameworks(
        organization_id: OrganizationId,
        framework_ids: impl IntoIterator<Item = FrameworkId>,
    ) -> Self {
        Self {
            organization_id,
            mode: ReconcileMode::AddFrameworks(framework_ids.into_iter().collect()),
        }
    }

    /// Fill gaps in every framework `organization_id` already has.
    pub fn fix_organization(organization_id: OrganizationId) -> Self {
        Self {
            organization_id,
            mode: ReconcileMode::FixOrganization,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs reconciliation against a [`Database`].
pub struct Orchestrator<D> {
    db: D,
    materializer: Materializer,
    audit: Arc<dyn AuditSink>,
    cache: Arc<dyn CacheInvalidator>,
}

impl<D: std::fmt::Debug> std::fmt::Debug for Orchestrator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("db", &self.db)
            .field("materializer", &self.materializer)
            .finish_non_exhaustive()
    }
}

impl<D: Database> Orchestrator<D> {
    /// An orchestrator with logging collaborators and default chunking.
    pub fn new(db: D) -> Self {
        Self {
            db,
            materializer: Materializer::default(),
            audit: Arc::new(TracingAuditSink),
            cache: Arc::new(TracingCacheInvalidator),
        }
    }

    /// Replace the audit sink.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Replace the cache invalidator.
    pub fn with_cache_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = invalidator;
        self
    }

    /// Set the number of rows per insert statement.
    pub fn with_insert_chunk_size(mut self, chunk_size: usize) -> Self {
        self.materializer = Materializer::new(chunk_size);
        self
    }

    /// The backing database.
    pub fn database(&self) -> &D {
        &self.db
    }

    /// Run `request` and report the result as an outcome object.
    pub async fn execute(&self, request: ReconcileRequest) -> ReconcileOutcome {
        match self.reconcile(request).await {
            Ok(summary) => ReconcileOutcome::committed(summary),
            Err(e) => ReconcileOutcome::failed(e.to_string()),
        }
    }

    /// Run `request` through Planning, Applying and Committed.
    pub async fn reconcile(
        &self,
        request: ReconcileRequest,
    ) -> Result<MaterializationSummary, MaterializeError> {
        let organization_id = &request.organization_id;
        let mut run = Run::start(organization_id.clone());

        let targets = match self.prepare(&request).await {
            Ok(targets) => targets,
            Err(e) => {
                run.abort()?;
                tracing::info!(
                    organization_id = %organization_id,
                    mode = request.mode.name(),
                    class = %e.class(),
                    "run rejected: {e}"
                );
                telemetry::record_failed(&e);
                return Err(e);
            }
        };

        run.begin_applying()?;
        tracing::info!(
            organization_id = %organization_id,
            mode = request.mode.name(),
            frameworks = targets.len(),
            "run applying"
        );

        let summary = match self.apply(organization_id, &targets).await {
            Ok(summary) => summary,
            Err(e) => {
                let phase = run.abort()?;
                tracing::warn!(
                    organization_id = %organization_id,
                    phase = %phase,
                    class = %e.class(),
                    "run aborted: {e}"
                );
                telemetry::record_failed(&e);
                return Err(e);
            }
        };

        run.commit()?;
        tracing::info!(
            organization_id = %organization_id,
            created = summary.total(),
            controls = summary.controls_created,
            requirement_maps = summary.requirement_maps_created,
            "run committed"
        );
        telemetry::record_committed(&summary);
        self.notify(&request, summary).await;
        Ok(summary)
    }

    /// Dry run: plan `request` inside a transaction that is always rolled back.
    pub async fn plan(
        &self,
        request: &ReconcileRequest,
    ) -> Result<MaterializationPlan, MaterializeError> {
        let targets = self.prepare(request).await?;
        let mut tx = self.db.begin().await?;
        let staged = Self::diff(&mut tx, &request.organization_id, &targets).await;
        if let Err(e) = tx.rollback().await {
            tracing::warn!(error = %e, "dry-run rollback failed");
        }
        staged.map(|(_, plan)| plan)
    }

    /// Planning: validate `request` and resolve its target frameworks
    /// without opening a transaction.
    pub async fn prepare(
        &self,
        request: &ReconcileRequest,
    ) -> Result<Vec<FrameworkId>, MaterializeError> {
        let organization_id = &request.organization_id;

        if let ReconcileMode::AddFrameworks(ids) = &request.mode {
            if ids.is_empty() {
                return Err(MaterializeError::InvalidInput(
                    "at least one framework id is required".into(),
                ));
            }
        }

        if !self.db.organization_exists(organization_id).await? {
            return Err(MaterializeError::OrganizationNotFound(
                organization_id.clone(),
            ));
        }

        match &request.mode {
            ReconcileMode::AddFrameworks(ids) => {
                let requested: Vec<FrameworkId> = ids
                    .iter()
                    .cloned()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let visible: BTreeSet<FrameworkId> = self
                    .db
                    .visible_framework_ids(&requested)
                    .await?
                    .into_iter()
                    .collect();
                if visible.is_empty() {
                    return Err(CatalogError::NoVisibleFrameworks(requested).into());
                }
                let missing: Vec<FrameworkId> = requested
                    .iter()
                    .filter(|id| !visible.contains(id))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(MaterializeError::FrameworksNotFound(missing));
                }
                Ok(requested)
            }
            ReconcileMode::FixOrganization => {
                let instantiated = self.db.instantiated_framework_ids(organization_id).await?;
                let visible = self.db.visible_framework_ids(&instantiated).await?;
                if visible.len() < instantiated.len() {
                    tracing::debug!(
                        organization_id = %organization_id,
                        hidden = instantiated.len() - visible.len(),
                        "skipping unpublished frameworks"
                    );
                }
                if visible.is_empty() {
                    return Err(MaterializeError::NoFrameworks(organization_id.clone()));
                }
                let mut visible = visible;
                visible.sort();
                Ok(visible)
            }
        }
    }

    /// Applying: diff and write inside one transaction, then commit.
    async fn apply(
        &self,
        organization_id: &OrganizationId,
        targets: &[FrameworkId],
    ) -> Result<MaterializationSummary, MaterializeError> {
        let mut tx = self.db.begin().await.map_err(aborted)?;

        let written = match Self::diff(&mut tx, organization_id, targets).await {
            Ok((catalog, plan)) => self
                .materializer
                .apply(&mut tx, organization_id, &catalog, &plan)
                .await
                .map_err(aborted),
            Err(e) => Err(e),
        };

        match written {
            Ok(summary) => {
                tx.commit().await.map_err(aborted)?;
                Ok(summary)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn diff(
        tx: &mut D::Tx,
        organization_id: &OrganizationId,
        targets: &[FrameworkId],
    ) -> Result<(TemplateCatalog, MaterializationPlan), MaterializeError> {
        let catalog = TemplateCatalog::load(&mut *tx, targets)
            .await
            .map_err(|e| match e {
                CatalogError::Store(source) => aborted(source),
                other => MaterializeError::Catalog(other),
            })?;
        let existing = ExistingState::load(&mut *tx, organization_id, &catalog)
            .await
            .map_err(aborted)?;
        let plan = resolve(&catalog, &existing);
        Ok((catalog, plan))
    }

    async fn notify(&self, request: &ReconcileRequest, summary: MaterializationSummary) {
        self.audit
            .record(MaterializationEvent {
                organization_id: request.organization_id.clone(),
                mode: request.mode.clone(),
                summary,
                committed_at: Utc::now(),
            })
            .await;
        if !summary.is_empty() {
            let scopes = CacheScope::stale_after(&summary);
            self.cache
                .invalidate(&request.organization_id, &scopes)
                .await;
        }
    }
}

fn aborted(source: StoreError) -> MaterializeError {
    MaterializeError::Aborted {
        phase: RunPhase::Applying,
        source,
    }
}
