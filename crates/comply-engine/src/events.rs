//! # Post-Commit Collaborators
//!
//! After a run commits, the orchestrator notifies two external
//! collaborators:
//!
//! - an [`AuditSink`], which receives one [`MaterializationEvent`] per
//!   committed run;
//! - a [`CacheInvalidator`], which is told which organization-scoped
//!   views are stale. It is only signalled when the run created rows.
//!
//! Delivery and storage are the collaborators' business. The defaults
//! here only log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use comply_core::{MaterializationSummary, OrganizationId};

use crate::orchestrator::ReconcileMode;

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Emitted once per committed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializationEvent {
    pub organization_id: OrganizationId,
    pub mode: ReconcileMode,
    pub summary: MaterializationSummary,
    pub committed_at: DateTime<Utc>,
}

/// Receiver of audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record a committed run. Failures are the sink's to handle; the
    /// run has already committed.
    async fn record(&self, event: MaterializationEvent);
}

/// Audit sink that writes events to the `tracing` pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: MaterializationEvent) {
        tracing::info!(
            target: "comply::audit",
            organization_id = %event.organization_id,
            mode = event.mode.name(),
            created = event.summary.total(),
            controls = event.summary.controls_created,
            policies = event.summary.policies_created,
            tasks = event.summary.tasks_created,
            committed_at = %event.committed_at,
            "materialization committed"
        );
    }
}

// ---------------------------------------------------------------------------
// Cache invalidation
// ---------------------------------------------------------------------------

/// A UI-facing view of one organization's instance graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    Frameworks,
    Controls,
    Policies,
    Tasks,
}

impl CacheScope {
    /// Path segment of this view.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frameworks => "frameworks",
            Self::Controls => "controls",
            Self::Policies => "policies",
            Self::Tasks => "tasks",
        }
    }

    /// Organization-scoped path of this view, e.g. `/org_1/controls`.
    pub fn path(&self, organization_id: &OrganizationId) -> String {
        format!("/{}/{}", organization_id, self.as_str())
    }

    /// Views made stale by a run that created `summary`.
    ///
    /// New requirement maps change what the frameworks and controls views
    /// show; new connections change controls and the linked artifact.
    pub fn stale_after(summary: &MaterializationSummary) -> Vec<CacheScope> {
        let mut scopes = Vec::new();
        if summary.framework_instances_created > 0 || summary.requirement_maps_created > 0 {
            scopes.push(Self::Frameworks);
        }
        if summary.controls_created > 0
            || summary.requirement_maps_created > 0
            || summary.policy_links_created > 0
            || summary.task_links_created > 0
        {
            scopes.push(Self::Controls);
        }
        if summary.policies_created > 0 || summary.policy_links_created > 0 {
            scopes.push(Self::Policies);
        }
        if summary.tasks_created > 0 || summary.task_links_created > 0 {
            scopes.push(Self::Tasks);
        }
        scopes
    }
}

impl std::fmt::Display for CacheScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of cache-staleness signals.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Mark `scopes` of `organization_id` as stale.
    async fn invalidate(&self, organization_id: &OrganizationId, scopes: &[CacheScope]);
}

/// Cache invalidator that logs the stale paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCacheInvalidator;

#[async_trait]
impl CacheInvalidator for TracingCacheInvalidator {
    async fn invalidate(&self, organization_id: &OrganizationId, scopes: &[CacheScope]) {
        for scope in scopes {
            tracing::debug!(
                target: "comply::cache",
                organization_id = %organization_id,
                path = %scope.path(organization_id),
                "cache invalidated"
            );
        }
    }
}
