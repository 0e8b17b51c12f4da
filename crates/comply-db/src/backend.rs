//! [`Database`] and [`Transaction`] implementations over a Postgres pool.

use async_trait::async_trait;
use sqlx::PgPool;

use comply_core::{
    Control, ControlId, ControlPolicyLink, ControlTaskLink, ControlTemplate, ControlTemplateId,
    ControlTemplateRelations, FrameworkId, FrameworkInstance, FrameworkWithRequirements,
    OrganizationId, Policy, PolicyTemplate, PolicyTemplateId, RequirementId, RequirementMap, Task,
    TaskTemplate, TaskTemplateId,
};
use comply_store::{
    Database, InsertOutcome, InstanceRepository, StoreError, TemplateRepository, Transaction,
};

use crate::error::backend;
use crate::{instances, templates};

/// Postgres-backed [`Database`]. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Wrap an initialised pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgDatabase {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(PgTransaction { tx })
    }

    async fn organization_exists(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        instances::organization_exists(&mut conn, organization_id).await
    }

    async fn visible_framework_ids(
        &self,
        framework_ids: &[FrameworkId],
    ) -> Result<Vec<FrameworkId>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        templates::visible_framework_ids(&mut conn, framework_ids).await
    }

    async fn instantiated_framework_ids(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<FrameworkId>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        instances::instantiated_framework_ids(&mut conn, organization_id).await
    }

    async fn organization_ids(&self) -> Result<Vec<OrganizationId>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        instances::organization_ids(&mut conn).await
    }
}

/// One open Postgres transaction. Dropping it without commit rolls back.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

impl std::fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransaction").finish_non_exhaustive()
    }
}

#[async_trait]
impl TemplateRepository for PgTransaction {
    async fn load_framework_subgraph(
        &mut self,
        framework_ids: &[FrameworkId],
    ) -> Result<Vec<FrameworkWithRequirements>, StoreError> {
        templates::load_framework_subgraph(&mut self.tx, framework_ids).await
    }

    async fn load_control_templates_for_requirements(
        &mut self,
        requirement_ids: &[RequirementId],
    ) -> Result<Vec<ControlTemplate>, StoreError> {
        templates::load_control_templates_for_requirements(&mut self.tx, requirement_ids).await
    }

    async fn load_policy_templates_for_controls(
        &mut self,
        control_template_ids: &[ControlTemplateId],
    ) -> Result<Vec<PolicyTemplate>, StoreError> {
        templates::load_policy_templates_for_controls(&mut self.tx, control_template_ids).await
    }

    async fn load_task_templates_for_controls(
        &mut self,
        control_template_ids: &[ControlTemplateId],
    ) -> Result<Vec<TaskTemplate>, StoreError> {
        templates::load_task_templates_for_controls(&mut self.tx, control_template_ids).await
    }

    async fn load_control_template_relations(
        &mut self,
        control_template_ids: &[ControlTemplateId],
    ) -> Result<Vec<ControlTemplateRelations>, StoreError> {
        templates::load_control_template_relations(&mut self.tx, control_template_ids).await
    }
}

#[async_trait]
impl InstanceRepository for PgTransaction {
    async fn organization_exists(
        &mut self,
        organization_id: &OrganizationId,
    ) -> Result<bool, StoreError> {
        instances::organization_exists(&mut self.tx, organization_id).await
    }

    async fn framework_instances(
        &mut self,
        organization_id: &OrganizationId,
        framework_ids: &[FrameworkId],
    ) -> Result<Vec<FrameworkInstance>, StoreError> {
        instances::framework_instances(&mut self.tx, organization_id, framework_ids).await
    }

    async fn controls_for_templates(
        &mut self,
        organization_id: &OrganizationId,
        template_ids: &[ControlTemplateId],
    ) -> Result<Vec<Control>, StoreError> {
        instances::controls_for_templates(&mut self.tx, organization_id, template_ids).await
    }

    async fn policies_for_templates(
        &mut self,
        organization_id: &OrganizationId,
        template_ids: &[PolicyTemplateId],
    ) -> Result<Vec<Policy>, StoreError> {
        instances::policies_for_templates(&mut self.tx, organization_id, template_ids).await
    }

    async fn tasks_for_templates(
        &mut self,
        organization_id: &OrganizationId,
        template_ids: &[TaskTemplateId],
    ) -> Result<Vec<Task>, StoreError> {
        instances::tasks_for_templates(&mut self.tx, organization_id, template_ids).await
    }

    async fn requirement_maps_for_controls(
        &mut self,
        control_ids: &[ControlId],
    ) -> Result<Vec<RequirementMap>, StoreError> {
        instances::requirement_maps_for_controls(&mut self.tx, control_ids).await
    }

    async fn policy_links_for_controls(
        &mut self,
        control_ids: &[ControlId],
    ) -> Result<Vec<ControlPolicyLink>, StoreError> {
        instances::policy_links_for_controls(&mut self.tx, control_ids).await
    }

    async fn task_links_for_controls(
        &mut self,
        control_ids: &[ControlId],
    ) -> Result<Vec<ControlTaskLink>, StoreError> {
        instances::task_links_for_controls(&mut self.tx, control_ids).await
    }

    async fn insert_framework_instance(
        &mut self,
        row: &FrameworkInstance,
    ) -> Result<InsertOutcome, StoreError> {
        instances::insert_framework_instance(&mut self.tx, row).await
    }

    async fn insert_controls(&mut self, rows: &[Control]) -> Result<InsertOutcome, StoreError> {
        instances::insert_controls(&mut self.tx, rows).await
    }

    async fn insert_policies(&mut self, rows: &[Policy]) -> Result<InsertOutcome, StoreError> {
        instances::insert_policies(&mut self.tx, rows).await
    }

    async fn insert_tasks(&mut self, rows: &[Task]) -> Result<InsertOutcome, StoreError> {
        instances::insert_tasks(&mut self.tx, rows).await
    }

    async fn insert_requirement_maps(
        &mut self,
        rows: &[RequirementMap],
    ) -> Result<InsertOutcome, StoreError> {
        instances::insert_requirement_maps(&mut self.tx, rows).await
    }

    async fn connect_policies(
        &mut self,
        links: &[ControlPolicyLink],
    ) -> Result<InsertOutcome, StoreError> {
        instances::connect_policies(&mut self.tx, links).await
    }

    async fn connect_tasks(
        &mut self,
        links: &[ControlTaskLink],
    ) -> Result<InsertOutcome, StoreError> {
        instances::connect_tasks(&mut self.tx, links).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(backend)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(backend)
    }
}
