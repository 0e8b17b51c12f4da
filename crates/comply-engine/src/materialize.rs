//! # Materializer
//!
//! Executes a [`MaterializationPlan`] against the run's transaction.
//!
//! ## Layers
//!
//! Rows are written in dependency order, one layer at a time:
//!
//! ```text
//! FrameworkInstance ─▶ Control ─▶ { Policy, Task } ─▶ RequirementMap ─▶ connections
//! ```
//!
//! Inserts are chunked multi-row batches. After each layer the affected
//! rows are re-read by template id, which yields the instance ids of both
//! new and pre-existing rows for the next layer. A row that is still
//! missing after its layer was written is reported as
//! [`StoreError::NotFound`] and aborts the run.
//!
//! Connections are written last and only for the pairs that the re-read
//! shows are not yet connected, so a control that existed before the run
//! picks up policies or tasks added to its template later.
//!
//! Every batch goes through [`InsertIfAbsent::if_absent`]: a duplicate-key
//! race is counted as skipped rows, anything else propagates.

use std::collections::{BTreeSet, HashMap, HashSet};

use comply_core::{
    Control, ControlId, ControlPolicyLink, ControlTaskLink, ControlTemplateId, FrameworkId,
    FrameworkInstance, FrameworkInstanceId, MaterializationSummary, OrganizationId, Policy,
    PolicyId, PolicyTemplateId, RequirementMap, Task, TaskId, TaskTemplateId,
};
use comply_store::{InsertIfAbsent, InstanceRepository, StoreError};

use crate::catalog::TemplateCatalog;
use crate::diff::MaterializationPlan;

/// Default number of rows per insert statement.
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;

/// Writes plans in layered, chunked batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Materializer {
    chunk_size: usize,
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new(DEFAULT_INSERT_CHUNK_SIZE)
    }
}

impl Materializer {
    /// A materializer inserting at most `chunk_size` rows per statement.
    /// A size of zero is treated as one.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Rows per insert statement.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write `plan` for `organization_id` and return the number of rows each
    /// layer actually created.
    pub async fn apply<T>(
        &self,
        tx: &mut T,
        organization_id: &OrganizationId,
        catalog: &TemplateCatalog,
        plan: &MaterializationPlan,
    ) -> Result<MaterializationSummary, StoreError>
    where
        T: InstanceRepository + ?Sized,
    {
        let mut summary = MaterializationSummary::default();

        // Layer 1: framework instances.
        for framework_id in &plan.framework_instances_to_create {
            let row = FrameworkInstance::new(organization_id.clone(), framework_id.clone());
            summary.framework_instances_created += tx
                .insert_framework_instance(&row)
                .await
                .if_absent(1)?
                .inserted;
        }
        let framework_instances: HashMap<FrameworkId, FrameworkInstanceId> = tx
            .framework_instances(organization_id, &catalog.framework_ids())
            .await?
            .into_iter()
            .map(|fi| (fi.framework_id, fi.id))
            .collect();
        require_all("framework instance", catalog.framework_ids(), &framework_instances)?;

        // Layer 2: controls.
        let controls: Vec<Control> = plan
            .controls_to_create
            .iter()
            .filter_map(|id| catalog.control_template(id))
            .map(|tpl| Control::from_template(organization_id.clone(), tpl))
            .collect();
        for chunk in controls.chunks(self.chunk_size) {
            summary.controls_created += tx
                .insert_controls(chunk)
                .await
                .if_absent(chunk.len())?
                .inserted;
        }
        let control_ids: HashMap<ControlTemplateId, ControlId> = tx
            .controls_for_templates(organization_id, &catalog.control_template_ids())
            .await?
            .into_iter()
            .filter_map(|c| Some((c.control_template_id?, c.id)))
            .collect();
        require_all("control", catalog.control_template_ids(), &control_ids)?;

        // Layer 3: policies and tasks.
        let policies: Vec<Policy> = plan
            .policies_to_create
            .iter()
            .filter_map(|id| catalog.policy_template(id))
            .map(|tpl| Policy::from_template(organization_id.clone(), tpl))
            .collect();
        for chunk in policies.chunks(self.chunk_size) {
            summary.policies_created += tx
                .insert_policies(chunk)
                .await
                .if_absent(chunk.len())?
                .inserted;
        }

        let mut tasks = Vec::with_capacity(plan.tasks_to_create.len());
        for id in &plan.tasks_to_create {
            let Some(tpl) = catalog.task_template(id) else {
                continue;
            };
            let entity_id = catalog
                .first_control_for_task(id)
                .map(|ct| lookup("control", &control_ids, ct))
                .transpose()?;
            tasks.push(Task::from_template(organization_id.clone(), tpl, entity_id));
        }
        for chunk in tasks.chunks(self.chunk_size) {
            summary.tasks_created += tx
                .insert_tasks(chunk)
                .await
                .if_absent(chunk.len())?
                .inserted;
        }

        let policy_ids: HashMap<PolicyTemplateId, PolicyId> = tx
            .policies_for_templates(organization_id, &catalog.policy_template_ids())
            .await?
            .into_iter()
            .filter_map(|p| Some((p.policy_template_id?, p.id)))
            .collect();
        require_all("policy", catalog.policy_template_ids(), &policy_ids)?;
        let task_ids: HashMap<TaskTemplateId, TaskId> = tx
            .tasks_for_templates(organization_id, &catalog.task_template_ids())
            .await?
            .into_iter()
            .filter_map(|t| Some((t.task_template_id?, t.id)))
            .collect();
        require_all("task", catalog.task_template_ids(), &task_ids)?;

        // Layer 4: requirement maps.
        let mut edges = Vec::with_capacity(plan.requirement_map_edges_to_create.len());
        for edge in &plan.requirement_map_edges_to_create {
            edges.push(RequirementMap::new(
                lookup("control", &control_ids, &edge.control_template_id)?,
                lookup("framework instance", &framework_instances, &edge.framework_id)?,
                edge.requirement_id.clone(),
            ));
        }
        for chunk in edges.chunks(self.chunk_size) {
            summary.requirement_maps_created += tx
                .insert_requirement_maps(chunk)
                .await
                .if_absent(chunk.len())?
                .inserted;
        }

        // Layer 5: connections, delta only.
        let all_controls: Vec<ControlId> = control_ids.values().cloned().collect();
        if !all_controls.is_empty() {
            let connected: HashSet<ControlPolicyLink> = tx
                .policy_links_for_controls(&all_controls)
                .await?
                .into_iter()
                .collect();
            let mut delta = BTreeSet::new();
            for link in &plan.policy_links_to_create {
                let link = ControlPolicyLink {
                    control_id: lookup("control", &control_ids, &link.control_template_id)?,
                    policy_id: lookup("policy", &policy_ids, &link.policy_template_id)?,
                };
                if !connected.contains(&link) {
                    delta.insert(link);
                }
            }
            let delta: Vec<ControlPolicyLink> = delta.into_iter().collect();
            for chunk in delta.chunks(self.chunk_size) {
                summary.policy_links_created += tx
                    .connect_policies(chunk)
                    .await
                    .if_absent(chunk.len())?
                    .inserted;
            }

            let connected: HashSet<ControlTaskLink> = tx
                .task_links_for_controls(&all_controls)
                .await?
                .into_iter()
                .collect();
            let mut delta = BTreeSet::new();
            for link in &plan.task_links_to_create {
                let link = ControlTaskLink {
                    control_id: lookup("control", &control_ids, &link.control_template_id)?,
                    task_id: lookup("task", &task_ids, &link.task_template_id)?,
                };
                if !connected.contains(&link) {
                    delta.insert(link);
                }
            }
            let delta: Vec<ControlTaskLink> = delta.into_iter().collect();
            for chunk in delta.chunks(self.chunk_size) {
                summary.task_links_created += tx
                    .connect_tasks(chunk)
                    .await
                    .if_absent(chunk.len())?
                    .inserted;
            }
        }

        tracing::debug!(
            organization_id = %organization_id,
            framework_instances = summary.framework_instances_created,
            controls = summary.controls_created,
            policies = summary.policies_created,
            tasks = summary.tasks_created,
            requirement_maps = summary.requirement_maps_created,
            policy_links = summary.policy_links_created,
            task_links = summary.task_links_created,
            "plan applied"
        );
        Ok(summary)
    }
}

fn lookup<K, V>(entity: &'static str, ids: &HashMap<K, V>, key: &K) -> Result<V, StoreError>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
    V: Clone,
{
    ids.get(key).cloned().ok_or_else(|| StoreError::NotFound {
        entity,
        id: key.to_string(),
    })
}

fn require_all<K, V>(
    entity: &'static str,
    expected: Vec<K>,
    found: &HashMap<K, V>,
) -> Result<(), StoreError>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
{
    match expected.into_iter().find(|k| !found.contains_key(k)) {
        Some(missing) => Err(StoreError::NotFound {
            entity,
            id: missing.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comply_core::{PolicyStatus, TaskStatus};
    use comply_store::{
        CatalogSeed, Database, FailPoint, MemoryDatabase, MemoryTransaction, Transaction,
    };

    use crate::diff::{resolve, ExistingState};

    const SEED: &str = r#"
organizations: [org_1]
frameworks:
  - id: soc2
    name: SOC 2
    version: "2017"
    requirements:
      - { id: cc1, identifier: CC1.1 }
      - { id: cc2, identifier: CC1.2 }
control_templates:
  - { id: ct_a, name: Access, requirements: [cc1], policies: [pt_a], tasks: [tt_a] }
  - { id: ct_b, name: Backups, requirements: [cc1, cc2], tasks: [tt_a] }
policy_templates:
  - { id: pt_a, name: Access Policy }
task_templates:
  - { id: tt_a, name: Review access }
"#;

    fn org() -> OrganizationId {
        OrganizationId::from("org_1")
    }

    /// Plan and apply one run, leaving the transaction open.
    async fn stage(
        db: &MemoryDatabase,
        chunk_size: usize,
    ) -> Result<(MemoryTransaction, MaterializationSummary), StoreError> {
        let mut tx = db.begin().await?;
        let catalog = TemplateCatalog::load(&mut tx, &[FrameworkId::from("soc2")])
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let existing = ExistingState::load(&mut tx, &org(), &catalog).await?;
        let plan = resolve(&catalog, &existing);
        let summary = Materializer::new(chunk_size)
            .apply(&mut tx, &org(), &catalog, &plan)
            .await?;
        Ok((tx, summary))
    }

    async fn run_once(db: &MemoryDatabase, chunk_size: usize) -> Result<MaterializationSummary, StoreError> {
        let (tx, summary) = stage(db, chunk_size).await?;
        tx.commit().await?;
        Ok(summary)
    }

    fn db() -> MemoryDatabase {
        MemoryDatabase::from_seed(&CatalogSeed::from_yaml_str(SEED).unwrap())
    }

    #[tokio::test]
    async fn writes_every_layer() {
        let db = db();
        let summary = run_once(&db, 1).await.unwrap();
        assert_eq!(summary.framework_instances_created, 1);
        assert_eq!(summary.controls_created, 2);
        assert_eq!(summary.policies_created, 1);
        assert_eq!(summary.tasks_created, 1);
        assert_eq!(summary.requirement_maps_created, 3);
        assert_eq!(summary.policy_links_created, 1);
        assert_eq!(summary.task_links_created, 2);

        let graph = db.snapshot();
        assert!(graph.policies.iter().all(|p| p.status == PolicyStatus::Draft));
        assert!(graph.tasks.iter().all(|t| t.status == TaskStatus::Todo));
    }

    #[tokio::test]
    async fn task_anchors_to_first_control_in_catalog_order() {
        let db = db();
        run_once(&db, 10).await.unwrap();
        let graph = db.snapshot();
        let ct_a = graph
            .controls
            .iter()
            .find(|c| c.control_template_id == Some(ControlTemplateId::from("ct_a")))
            .unwrap();
        assert_eq!(graph.tasks[0].entity_id.as_ref(), Some(&ct_a.id));
    }

    #[tokio::test]
    async fn second_pass_creates_nothing() {
        let db = db();
        run_once(&db, 10).await.unwrap();
        let before = db.snapshot();
        let summary = run_once(&db, 10).await.unwrap();
        assert!(summary.is_empty(), "{summary:?}");
        assert_eq!(db.snapshot(), before);
    }

    #[tokio::test]
    async fn lost_race_is_counted_as_skip() {
        let db = db();
        db.race_at(FailPoint::InsertControls);
        let summary = run_once(&db, 10).await.unwrap();
        assert_eq!(summary.controls_created, 0);
        assert_eq!(summary.requirement_maps_created, 3);
        assert_eq!(db.snapshot().controls.len(), 2);
    }

    #[tokio::test]
    async fn interleaved_runs_for_one_organization_both_commit() {
        let db = db();
        let (first, _) = stage(&db, 10).await.unwrap();
        let (second, _) = stage(&db, 10).await.unwrap();
        first.commit().await.unwrap();
        second.commit().await.unwrap();

        let graph = db.snapshot();
        assert_eq!(graph.framework_instances.len(), 1);
        assert_eq!(graph.controls.len(), 2);
        assert_eq!(graph.policies.len(), 1);
        assert_eq!(graph.tasks.len(), 1);
        assert_eq!(graph.requirement_maps.len(), 3);
        assert_eq!(graph.policy_links.len(), 1);
        assert_eq!(graph.task_links.len(), 2);

        let control_ids: Vec<_> = graph.controls.iter().map(|c| &c.id).collect();
        assert!(graph
            .requirement_maps
            .iter()
            .all(|rm| control_ids.contains(&&rm.control_id)
                && rm.framework_instance_id == graph.framework_instances[0].id));
        assert!(graph
            .task_links
            .iter()
            .all(|l| control_ids.contains(&&l.control_id) && l.task_id == graph.tasks[0].id));
        assert!(graph.tasks[0]
            .entity_id
            .as_ref()
            .is_some_and(|id| control_ids.contains(&id)));

        let rerun = run_once(&db, 10).await.unwrap();
        assert!(rerun.is_empty(), "{rerun:?}");
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let db = db();
        db.fail_at(FailPoint::InsertRequirementMaps);
        let err = run_once(&db, 10).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(db.snapshot().is_empty());
    }

    #[tokio::test]
    async fn missing_row_after_layer_is_not_found() {
        let db = db();
        let mut tx = db.begin().await.unwrap();
        let catalog = TemplateCatalog::load(&mut tx, &[FrameworkId::from("soc2")])
            .await
            .unwrap();
        // A plan that claims the framework instance already exists.
        let mut plan = resolve(&catalog, &ExistingState::default());
        plan.framework_instances_to_create.clear();
        let err = Materializer::default()
            .apply(&mut tx, &org(), &catalog, &plan)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "framework instance", .. }));
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        assert_eq!(Materializer::new(0).chunk_size(), 1);
    }
}
