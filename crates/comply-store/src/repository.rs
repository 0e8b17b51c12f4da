//! # Repository Seams
//!
//! The engine reaches storage only through the traits in this module.
//!
//! ## Transaction boundary
//!
//! There is no ambient database handle. A [`Database`] hands out a
//! [`Transaction`] via [`Database::begin`]; the transaction *is* the
//! repository, so every template read and instance write made during a
//! run is issued against the same transaction object, passed by `&mut`
//! reference. Only the orchestrator calls `begin`, `commit`, and
//! `rollback`. Dropping an uncommitted transaction discards its writes.
//!
//! ## Insert-if-absent
//!
//! Every instance write is insert-if-absent: rows that collide with an
//! existing natural key are skipped and counted in
//! [`InsertOutcome::skipped`] instead of failing the batch. A backend may
//! still surface a [`StoreError::Conflict`] when a concurrent writer wins a
//! race the backend cannot resolve in-statement; the [`InsertIfAbsent`]
//! adapter turns that into a logged, skipped outcome so callers never
//! inspect conflict errors themselves.

use async_trait::async_trait;

use comply_core::{
    Control, ControlId, ControlPolicyLink, ControlTaskLink, ControlTemplate, ControlTemplateId,
    ControlTemplateRelations, FrameworkId, FrameworkInstance, FrameworkWithRequirements,
    OrganizationId, Policy, PolicyTemplate, PolicyTemplateId, RequirementId, RequirementMap, Task,
    TaskTemplate, TaskTemplateId,
};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// InsertOutcome
// ---------------------------------------------------------------------------

/// Result of an insert-if-absent batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Rows written by this call.
    pub inserted: u64,
    /// Rows skipped because their natural key already existed.
    pub skipped: u64,
}

impl InsertOutcome {
    /// Every attempted row was written.
    pub fn inserted(n: usize) -> Self {
        Self {
            inserted: n as u64,
            skipped: 0,
        }
    }

    /// Every attempted row was already present.
    pub fn skipped(n: usize) -> Self {
        Self {
            inserted: 0,
            skipped: n as u64,
        }
    }

    /// Combine the outcomes of two chunks of the same batch.
    pub fn merge(self, other: Self) -> Self {
        Self {
            inserted: self.inserted + other.inserted,
            skipped: self.skipped + other.skipped,
        }
    }
}

/// Adapter that absorbs duplicate-key races on insert results.
pub trait InsertIfAbsent {
    /// Treat a [`StoreError::Conflict`] as "all `attempted` rows already
    /// present". Any other error passes through unchanged.
    fn if_absent(self, attempted: usize) -> Result<InsertOutcome, StoreError>;
}

impl InsertIfAbsent for Result<InsertOutcome, StoreError> {
    fn if_absent(self, attempted: usize) -> Result<InsertOutcome, StoreError> {
        match self {
            Err(StoreError::Conflict { entity, detail }) => {
                tracing::debug!(
                    entity,
                    detail = %detail,
                    attempted,
                    "duplicate key on insert, treating rows as already present"
                );
                Ok(InsertOutcome::skipped(attempted))
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Template repository
// ---------------------------------------------------------------------------

/// Read-only access to the shared template catalog.
///
/// Implementations must answer from the transaction's snapshot; none of
/// these calls has side effects.
#[async_trait]
pub trait TemplateRepository: Send {
    /// Load the visible frameworks among `framework_ids`, each with its
    /// requirements. Unknown or unpublished ids are simply absent from the
    /// result; the caller decides whether that is an error.
    async fn load_framework_subgraph(
        &mut self,
        framework_ids: &[FrameworkId],
    ) -> Result<Vec<FrameworkWithRequirements>, StoreError>;

    /// Control templates linked to at least one of `requirement_ids`.
    async fn load_control_templates_for_requirements(
        &mut self,
        requirement_ids: &[RequirementId],
    ) -> Result<Vec<ControlTemplate>, StoreError>;

    /// Policy templates linked to at least one of `control_template_ids`.
    async fn load_policy_templates_for_controls(
        &mut self,
        control_template_ids: &[ControlTemplateId],
    ) -> Result<Vec<PolicyTemplate>, StoreError>;

    /// Task templates linked to at least one of `control_template_ids`.
    async fn load_task_templates_for_controls(
        &mut self,
        control_template_ids: &[ControlTemplateId],
    ) -> Result<Vec<TaskTemplate>, StoreError>;

    /// Outgoing requirement/policy/task edges of each control template.
    async fn load_control_template_relations(
        &mut self,
        control_template_ids: &[ControlTemplateId],
    ) -> Result<Vec<ControlTemplateRelations>, StoreError>;
}

// ---------------------------------------------------------------------------
// Instance repository
// ---------------------------------------------------------------------------

/// Access to one organization's instance graph.
#[async_trait]
pub trait InstanceRepository: Send {
    /// Whether the organization row exists.
    async fn organization_exists(
        &mut self,
        organization_id: &OrganizationId,
    ) -> Result<bool, StoreError>;

    /// Existing framework instances for the given catalog frameworks.
    async fn framework_instances(
        &mut self,
        organization_id: &OrganizationId,
        framework_ids: &[FrameworkId],
    ) -> Result<Vec<FrameworkInstance>, StoreError>;

    /// Existing controls materialized from any of `template_ids`.
    async fn controls_for_templates(
        &mut self,
        organization_id: &OrganizationId,
        template_ids: &[ControlTemplateId],
    ) -> Result<Vec<Control>, StoreError>;

    /// Existing policies materialized from any of `template_ids`.
    async fn policies_for_templates(
        &mut self,
        organization_id: &OrganizationId,
        template_ids: &[PolicyTemplateId],
    ) -> Result<Vec<Policy>, StoreError>;

    /// Existing tasks materialized from any of `template_ids`.
    async fn tasks_for_templates(
        &mut self,
        organization_id: &OrganizationId,
        template_ids: &[TaskTemplateId],
    ) -> Result<Vec<Task>, StoreError>;

    /// Requirement-map edges whose control is one of `control_ids`.
    async fn requirement_maps_for_controls(
        &mut self,
        control_ids: &[ControlId],
    ) -> Result<Vec<RequirementMap>, StoreError>;

    /// Control↔Policy connections for the given controls.
    async fn policy_links_for_controls(
        &mut self,
        control_ids: &[ControlId],
    ) -> Result<Vec<ControlPolicyLink>, StoreError>;

    /// Control↔Task connections for the given controls.
    async fn task_links_for_controls(
        &mut self,
        control_ids: &[ControlId],
    ) -> Result<Vec<ControlTaskLink>, StoreError>;

    /// Insert one framework instance if `(organization_id, framework_id)` is absent.
    async fn insert_framework_instance(
        &mut self,
        row: &FrameworkInstance,
    ) -> Result<InsertOutcome, StoreError>;

    /// Insert controls, skipping any whose `(organization_id, control_template_id)` exists.
    async fn insert_controls(&mut self, rows: &[Control]) -> Result<InsertOutcome, StoreError>;

    /// Insert policies, skipping any whose `(organization_id, policy_template_id)` exists.
    async fn insert_policies(&mut self, rows: &[Policy]) -> Result<InsertOutcome, StoreError>;

    /// Insert tasks, skipping any whose `(organization_id, task_template_id)` exists.
    async fn insert_tasks(&mut self, rows: &[Task]) -> Result<InsertOutcome, StoreError>;

    /// Insert requirement-map edges, skipping duplicate triples.
    async fn insert_requirement_maps(
        &mut self,
        rows: &[RequirementMap],
    ) -> Result<InsertOutcome, StoreError>;

    /// Connect controls to policies, skipping existing connections.
    async fn connect_policies(
        &mut self,
        links: &[ControlPolicyLink],
    ) -> Result<InsertOutcome, StoreError>;

    /// Connect controls to tasks, skipping existing connections.
    async fn connect_tasks(&mut self, links: &[ControlTaskLink])
        -> Result<InsertOutcome, StoreError>;
}

// ---------------------------------------------------------------------------
// Transaction / Database
// ---------------------------------------------------------------------------

/// An open unit of work. Reads see its own uncommitted writes.
#[async_trait]
pub trait Transaction: TemplateRepository + InstanceRepository + Send {
    /// Make every write of this transaction durable and visible.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every write of this transaction.
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Entry point to a backend. Hands out transactions and answers the few
/// pre-transaction questions the orchestrator asks while planning.
#[async_trait]
pub trait Database: Send + Sync {
    /// Transaction type produced by [`Database::begin`].
    type Tx: Transaction;

    /// Open a transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Whether the organization row exists.
    async fn organization_exists(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<bool, StoreError>;

    /// The visible (published) frameworks among `framework_ids`.
    async fn visible_framework_ids(
        &self,
        framework_ids: &[FrameworkId],
    ) -> Result<Vec<FrameworkId>, StoreError>;

    /// Catalog frameworks the organization has already instantiated.
    async fn instantiated_framework_ids(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<FrameworkId>, StoreError>;

    /// Every organization, in a stable order.
    async fn organization_ids(&self) -> Result<Vec<OrganizationId>, StoreError>;
}
