//! # In-Memory Backend
//!
//! A [`Database`] over process memory, used by tests and by
//! `comply simulate`. It keeps the same contract as the PostgreSQL backend:
//!
//! - **Read committed.** A transaction reads the committed graph plus its
//!   own staged writes. Writes become visible to others only on commit.
//! - **Insert-if-absent.** Natural-key collisions with committed or staged
//!   rows are skipped and counted, never raised.
//! - **Atomic commit.** Staged rows are applied all at once. A staged row
//!   whose natural key another transaction committed in the meantime is
//!   dropped in favour of the committed row, and staged edges are repointed
//!   at it. This is the outcome PostgreSQL reaches when `ON CONFLICT DO
//!   NOTHING` waits on the other writer and then skips.
//! - **Drop = rollback.** An uncommitted transaction leaves no trace.
//!
//! ## Fault injection
//!
//! [`MemoryDatabase::fail_at`] makes an operation fail with a backend error
//! every time it runs, until [`MemoryDatabase::clear_faults`].
//! [`MemoryDatabase::race_at`] simulates a concurrent run winning a
//! duplicate-key race exactly once: the rows are committed on the other
//! run's behalf and the call reports [`StoreError::Conflict`].

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use comply_core::{
    Control, ControlId, ControlPolicyLink, ControlTaskLink, ControlTemplate, ControlTemplateId,
    ControlTemplateRelations, FrameworkId, FrameworkInstance, FrameworkInstanceId,
    FrameworkWithRequirements, OrganizationId, Policy, PolicyId, PolicyTemplate,
    PolicyTemplateId, RequirementId, RequirementMap, Task, TaskId, TaskTemplate, TaskTemplateId,
};

use crate::error::StoreError;
use crate::repository::{
    Database, InsertOutcome, InstanceRepository, TemplateRepository, Transaction,
};
use crate::seed::CatalogSeed;

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Operations that can be made to fail or race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertFrameworkInstance,
    InsertControls,
    InsertPolicies,
    InsertTasks,
    InsertRequirementMaps,
    ConnectPolicies,
    ConnectTasks,
    Commit,
}

impl std::fmt::Display for FailPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InsertFrameworkInstance => "insert_framework_instance",
            Self::InsertControls => "insert_controls",
            Self::InsertPolicies => "insert_policies",
            Self::InsertTasks => "insert_tasks",
            Self::InsertRequirementMaps => "insert_requirement_maps",
            Self::ConnectPolicies => "connect_policies",
            Self::ConnectTasks => "connect_tasks",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Fail,
    Race,
}

#[derive(Debug, Default)]
struct Faults {
    armed: HashMap<FailPoint, Fault>,
}

impl Faults {
    /// Failures stay armed; races fire once.
    fn take(&mut self, point: FailPoint) -> Option<Fault> {
        match self.armed.get(&point).copied() {
            Some(Fault::Race) => self.armed.remove(&point),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// InstanceGraph
// ---------------------------------------------------------------------------

/// Every instance row of every organization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceGraph {
    pub framework_instances: Vec<FrameworkInstance>,
    pub controls: Vec<Control>,
    pub policies: Vec<Policy>,
    pub tasks: Vec<Task>,
    pub requirement_maps: Vec<RequirementMap>,
    pub policy_links: Vec<ControlPolicyLink>,
    pub task_links: Vec<ControlTaskLink>,
}

type FrameworkKey = (OrganizationId, FrameworkId);
type ControlKey = (OrganizationId, ControlTemplateId);
type PolicyKey = (OrganizationId, PolicyTemplateId);
type TaskKey = (OrganizationId, TaskTemplateId);
type EdgeKey = (ControlId, FrameworkInstanceId, RequirementId);

impl InstanceGraph {
    /// Total row count across all tables.
    pub fn len(&self) -> usize {
        self.framework_instances.len()
            + self.controls.len()
            + self.policies.len()
            + self.tasks.len()
            + self.requirement_maps.len()
            + self.policy_links.len()
            + self.task_links.len()
    }

    /// Whether no rows exist at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Controls belonging to `organization_id`.
    pub fn controls_of<'a>(
        &'a self,
        organization_id: &'a OrganizationId,
    ) -> impl Iterator<Item = &'a Control> + 'a {
        self.controls
            .iter()
            .filter(move |c| &c.organization_id == organization_id)
    }

    fn framework_instance_with(&self, key: &FrameworkKey) -> Option<&FrameworkInstance> {
        self.framework_instances
            .iter()
            .find(|fi| fi.organization_id == key.0 && fi.framework_id == key.1)
    }

    fn control_with(&self, key: &ControlKey) -> Option<&Control> {
        self.controls.iter().find(|c| {
            c.organization_id == key.0 && c.control_template_id.as_ref() == Some(&key.1)
        })
    }

    fn policy_with(&self, key: &PolicyKey) -> Option<&Policy> {
        self.policies.iter().find(|p| {
            p.organization_id == key.0 && p.policy_template_id.as_ref() == Some(&key.1)
        })
    }

    fn task_with(&self, key: &TaskKey) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| t.organization_id == key.0 && t.task_template_id.as_ref() == Some(&key.1))
    }

    fn has_framework_instance(&self, key: &FrameworkKey) -> bool {
        self.framework_instance_with(key).is_some()
    }

    fn has_control(&self, key: &ControlKey) -> bool {
        self.control_with(key).is_some()
    }

    fn has_policy(&self, key: &PolicyKey) -> bool {
        self.policy_with(key).is_some()
    }

    fn has_task(&self, key: &TaskKey) -> bool {
        self.task_with(key).is_some()
    }

    fn has_requirement_map(&self, key: &EdgeKey) -> bool {
        self.requirement_maps.iter().any(|rm| {
            rm.control_id == key.0 && rm.framework_instance_id == key.1 && rm.requirement_id == key.2
        })
    }

    fn has_policy_link(&self, key: &ControlPolicyLink) -> bool {
        self.policy_links.contains(key)
    }

    fn has_task_link(&self, key: &ControlTaskLink) -> bool {
        self.task_links.contains(key)
    }

    /// Apply `staged` on top of this graph.
    ///
    /// A staged keyed row whose key was committed by another transaction in
    /// the meantime loses the race: it is dropped and every staged edge,
    /// link and task reference that pointed at it is repointed at the
    /// committed row. Edges and links that then duplicate a committed one
    /// are dropped too. Returns the number of staged rows dropped.
    fn merge(&mut self, staged: InstanceGraph) -> usize {
        let InstanceGraph {
            framework_instances,
            controls,
            policies,
            tasks,
            requirement_maps,
            policy_links,
            task_links,
        } = staged;
        let mut lost = IdRemap::default();

        for fi in framework_instances {
            match self.framework_instance_with(&framework_key(&fi)) {
                Some(winner) => {
                    lost.framework_instances.insert(fi.id, winner.id.clone());
                }
                None => self.framework_instances.push(fi),
            }
        }
        for c in controls {
            match control_key(&c).and_then(|k| self.control_with(&k)) {
                Some(winner) => {
                    lost.controls.insert(c.id, winner.id.clone());
                }
                None => self.controls.push(c),
            }
        }
        for p in policies {
            match policy_key(&p).and_then(|k| self.policy_with(&k)) {
                Some(winner) => {
                    lost.policies.insert(p.id, winner.id.clone());
                }
                None => self.policies.push(p),
            }
        }
        for mut t in tasks {
            match task_key(&t).and_then(|k| self.task_with(&k)) {
                Some(winner) => {
                    lost.tasks.insert(t.id, winner.id.clone());
                }
                None => {
                    t.entity_id = t.entity_id.map(|id| repoint(&lost.controls, id));
                    self.tasks.push(t);
                }
            }
        }
        let mut dropped = lost.len();

        for mut rm in requirement_maps {
            rm.control_id = repoint(&lost.controls, rm.control_id);
            rm.framework_instance_id =
                repoint(&lost.framework_instances, rm.framework_instance_id);
            if self.has_requirement_map(&edge_key(&rm)) {
                dropped += 1;
            } else {
                self.requirement_maps.push(rm);
            }
        }
        for link in policy_links {
            let link = ControlPolicyLink {
                control_id: repoint(&lost.controls, link.control_id),
                policy_id: repoint(&lost.policies, link.policy_id),
            };
            if self.has_policy_link(&link) {
                dropped += 1;
            } else {
                self.policy_links.push(link);
            }
        }
        for link in task_links {
            let link = ControlTaskLink {
                control_id: repoint(&lost.controls, link.control_id),
                task_id: repoint(&lost.tasks, link.task_id),
            };
            if self.has_task_link(&link) {
                dropped += 1;
            } else {
                self.task_links.push(link);
            }
        }
        dropped
    }
}

/// Staged ids that lost a commit race, mapped to the committed winner.
#[derive(Debug, Default)]
struct IdRemap {
    framework_instances: HashMap<FrameworkInstanceId, FrameworkInstanceId>,
    controls: HashMap<ControlId, ControlId>,
    policies: HashMap<PolicyId, PolicyId>,
    tasks: HashMap<TaskId, TaskId>,
}

impl IdRemap {
    fn len(&self) -> usize {
        self.framework_instances.len() + self.controls.len() + self.policies.len() + self.tasks.len()
    }
}

fn repoint<I: Clone + Eq + Hash>(lost: &HashMap<I, I>, id: I) -> I {
    lost.get(&id).cloned().unwrap_or(id)
}

fn framework_key(row: &FrameworkInstance) -> FrameworkKey {
    (row.organization_id.clone(), row.framework_id.clone())
}

fn control_key(row: &Control) -> Option<ControlKey> {
    row.control_template_id
        .clone()
        .map(|t| (row.organization_id.clone(), t))
}

fn policy_key(row: &Policy) -> Option<PolicyKey> {
    row.policy_template_id
        .clone()
        .map(|t| (row.organization_id.clone(), t))
}

fn task_key(row: &Task) -> Option<TaskKey> {
    row.task_template_id
        .clone()
        .map(|t| (row.organization_id.clone(), t))
}

fn edge_key(row: &RequirementMap) -> EdgeKey {
    (
        row.control_id.clone(),
        row.framework_instance_id.clone(),
        row.requirement_id.clone(),
    )
}

/// How one instance table is keyed and stored.
struct Table<T, K> {
    entity: &'static str,
    point: FailPoint,
    /// `None` for rows that carry no natural key: instance rows created
    /// without a template reference.
    key: fn(&T) -> Option<K>,
    exists: fn(&InstanceGraph, &K) -> bool,
    rows: fn(&mut InstanceGraph) -> &mut Vec<T>,
}

/// Split `rows` into those whose key is absent and a skip count.
/// Rows without a key (no template reference) are always admitted.
fn admit<T: Clone, K: Ord>(
    rows: &[T],
    key: fn(&T) -> Option<K>,
    present: impl Fn(&K) -> bool,
) -> (Vec<T>, InsertOutcome) {
    let mut seen = BTreeSet::new();
    let mut accepted = Vec::with_capacity(rows.len());
    let mut skipped = 0u64;
    for row in rows {
        if let Some(k) = key(row) {
            if present(&k) || !seen.insert(k) {
                skipped += 1;
                continue;
            }
        }
        accepted.push(row.clone());
    }
    let outcome = InsertOutcome {
        inserted: accepted.len() as u64,
        skipped,
    };
    (accepted, outcome)
}

// ---------------------------------------------------------------------------
// Catalog tables
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CatalogTables {
    frameworks: Vec<FrameworkWithRequirements>,
    control_templates: Vec<ControlTemplate>,
    relations: Vec<ControlTemplateRelations>,
    policy_templates: Vec<PolicyTemplate>,
    task_templates: Vec<TaskTemplate>,
}

impl CatalogTables {
    fn from_seed(seed: &CatalogSeed) -> Self {
        Self {
            frameworks: seed.frameworks_with_requirements(),
            control_templates: seed
                .control_templates
                .iter()
                .map(|ct| ct.template.clone())
                .collect(),
            relations: seed.relations(),
            policy_templates: seed.policy_templates.clone(),
            task_templates: seed.task_templates.clone(),
        }
    }

    fn relations_of<'a>(
        &'a self,
        ids: &'a [ControlTemplateId],
    ) -> impl Iterator<Item = &'a ControlTemplateRelations> + 'a {
        self.relations
            .iter()
            .filter(move |r| ids.contains(&r.control_template_id))
    }
}

// ---------------------------------------------------------------------------
// MemoryDatabase
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Shared {
    organizations: BTreeSet<OrganizationId>,
    catalog: CatalogTables,
    instances: InstanceGraph,
    faults: Faults,
}

/// In-memory [`Database`]. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Shared>>,
}

impl MemoryDatabase {
    /// An empty database: no catalog, no organizations.
    pub fn new() -> Self {
        Self::default()
    }

    /// A database populated from a catalog seed.
    pub fn from_seed(seed: &CatalogSeed) -> Self {
        let db = Self::new();
        db.load_seed(seed);
        db
    }

    /// Replace the template catalog with `seed` and register its
    /// organizations. Existing instance rows are kept, which is how tests
    /// model template evolution between runs.
    pub fn load_seed(&self, seed: &CatalogSeed) {
        let mut shared = self.inner.lock();
        shared.catalog = CatalogTables::from_seed(seed);
        shared
            .organizations
            .extend(seed.organizations.iter().cloned());
    }

    /// Register an organization.
    pub fn add_organization(&self, organization_id: OrganizationId) {
        self.inner.lock().organizations.insert(organization_id);
    }

    /// Copy of the committed instance graph.
    pub fn snapshot(&self) -> InstanceGraph {
        self.inner.lock().instances.clone()
    }

    /// Mutate the committed instance graph directly, bypassing transactions.
    pub fn edit_instances(&self, f: impl FnOnce(&mut InstanceGraph)) {
        f(&mut self.inner.lock().instances);
    }

    /// Make `point` fail with a backend error until faults are cleared.
    pub fn fail_at(&self, point: FailPoint) {
        self.inner.lock().faults.armed.insert(point, Fault::Fail);
    }

    /// Make the next call at `point` lose a duplicate-key race.
    pub fn race_at(&self, point: FailPoint) {
        self.inner.lock().faults.armed.insert(point, Fault::Race);
    }

    /// Disarm every fault.
    pub fn clear_faults(&self) {
        self.inner.lock().faults.armed.clear();
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            staged: InstanceGraph::default(),
        })
    }

    async fn organization_exists(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<bool, StoreError> {
        Ok(self.inner.lock().organizations.contains(organization_id))
    }

    async fn visible_framework_ids(
        &self,
        framework_ids: &[FrameworkId],
    ) -> Result<Vec<FrameworkId>, StoreError> {
        let shared = self.inner.lock();
        Ok(shared
            .catalog
            .frameworks
            .iter()
            .map(|fw| &fw.framework)
            .filter(|fw| fw.visible && framework_ids.contains(&fw.id))
            .map(|fw| fw.id.clone())
            .collect())
    }

    async fn instantiated_framework_ids(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<FrameworkId>, StoreError> {
        let shared = self.inner.lock();
        let ids: BTreeSet<FrameworkId> = shared
            .instances
            .framework_instances
            .iter()
            .filter(|fi| &fi.organization_id == organization_id)
            .map(|fi| fi.framework_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn organization_ids(&self) -> Result<Vec<OrganizationId>, StoreError> {
        Ok(self.inner.lock().organizations.iter().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryTransaction
// ---------------------------------------------------------------------------

/// Transaction over a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<Mutex<Shared>>,
    staged: InstanceGraph,
}

impl MemoryTransaction {
    fn insert_rows<T: Clone, K: Ord>(
        &mut self,
        table: Table<T, K>,
        rows: &[T],
    ) -> Result<InsertOutcome, StoreError> {
        let mut shared = self.inner.lock();
        match shared.faults.take(table.point) {
            Some(Fault::Fail) => {
                return Err(StoreError::Backend(format!(
                    "injected failure at {}",
                    table.point
                )))
            }
            Some(Fault::Race) => {
                let (accepted, _) = admit(rows, table.key, |k| (table.exists)(&shared.instances, k));
                (table.rows)(&mut shared.instances).extend(accepted);
                return Err(StoreError::Conflict {
                    entity: table.entity,
                    detail: format!("concurrent insert won at {}", table.point),
                });
            }
            None => {}
        }
        let staged = &self.staged;
        let (accepted, outcome) = admit(rows, table.key, |k| {
            (table.exists)(&shared.instances, k) || (table.exists)(staged, k)
        });
        drop(shared);
        (table.rows)(&mut self.staged).extend(accepted);
        Ok(outcome)
    }

    /// Run `f` over the committed graph and the staged graph.
    fn read<R>(&self, f: impl FnOnce([&InstanceGraph; 2]) -> R) -> R {
        let shared = self.inner.lock();
        f([&shared.instances, &self.staged])
    }
}

#[async_trait]
impl TemplateRepository for MemoryTransaction {
    async fn load_framework_subgraph(
        &mut self,
        framework_ids: &[FrameworkId],
    ) -> Result<Vec<FrameworkWithRequirements>, StoreError> {
        let shared = self.inner.lock();
        Ok(shared
            .catalog
            .frameworks
            .iter()
            .filter(|fw| fw.framework.visible && framework_ids.contains(&fw.framework.id))
            .cloned()
            .collect())
    }

    async fn load_control_templates_for_requirements(
        &mut self,
        requirement_ids: &[RequirementId],
    ) -> Result<Vec<ControlTemplate>, StoreError> {
        let shared = self.inner.lock();
        let linked: BTreeSet<&ControlTemplateId> = shared
            .catalog
            .relations
            .iter()
            .filter(|r| r.requirement_ids.iter().any(|id| requirement_ids.contains(id)))
            .map(|r| &r.control_template_id)
            .collect();
        Ok(shared
            .catalog
            .control_templates
            .iter()
            .filter(|ct| linked.contains(&ct.id))
            .cloned()
            .collect())
    }

    async fn load_policy_templates_for_controls(
        &mut self,
        control_template_ids: &[ControlTemplateId],
    ) -> Result<Vec<PolicyTemplate>, StoreError> {
        let shared = self.inner.lock();
        let linked: BTreeSet<&PolicyTemplateId> = shared
            .catalog
            .relations_of(control_template_ids)
            .flat_map(|r| r.policy_template_ids.iter())
            .collect();
        Ok(shared
            .catalog
            .policy_templates
            .iter()
            .filter(|p| linked.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn load_task_templates_for_controls(
        &mut self,
        control_template_ids: &[ControlTemplateId],
    ) -> Result<Vec<TaskTemplate>, StoreError> {
        let shared = self.inner.lock();
        let linked: BTreeSet<&TaskTemplateId> = shared
            .catalog
            .relations_of(control_template_ids)
            .flat_map(|r| r.task_template_ids.iter())
            .collect();
        Ok(shared
            .catalog
            .task_templates
            .iter()
            .filter(|t| linked.contains(&t.id))
            .cloned()
            .collect())
    }

    async fn load_control_template_relations(
        &mut self,
        control_template_ids: &[ControlTemplateId],
    ) -> Result<Vec<ControlTemplateRelations>, StoreError> {
        let shared = self.inner.lock();
        Ok(shared
            .catalog
            .relations_of(control_template_ids)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InstanceRepository for MemoryTransaction {
    async fn organization_exists(
        &mut self,
        organization_id: &OrganizationId,
    ) -> Result<bool, StoreError> {
        Ok(self.inner.lock().organizations.contains(organization_id))
    }

    async fn framework_instances(
        &mut self,
        organization_id: &OrganizationId,
        framework_ids: &[FrameworkId],
    ) -> Result<Vec<FrameworkInstance>, StoreError> {
        Ok(self.read(|layers| {
            layers
                .into_iter()
                .flat_map(|g| g.framework_instances.iter())
                .filter(|fi| {
                    &fi.organization_id == organization_id
                        && framework_ids.contains(&fi.framework_id)
                })
                .cloned()
                .collect()
        }))
    }

    async fn controls_for_templates(
        &mut self,
        organization_id: &OrganizationId,
        template_ids: &[ControlTemplateId],
    ) -> Result<Vec<Control>, StoreError> {
        Ok(self.read(|layers| {
            layers
                .into_iter()
                .flat_map(|g| g.controls.iter())
                .filter(|c| {
                    &c.organization_id == organization_id
                        && c.control_template_id
                            .as_ref()
                            .is_some_and(|t| template_ids.contains(t))
                })
                .cloned()
                .collect()
        }))
    }

    async fn policies_for_templates(
        &mut self,
        organization_id: &OrganizationId,
        template_ids: &[PolicyTemplateId],
    ) -> Result<Vec<Policy>, StoreError> {
        Ok(self.read(|layers| {
            layers
                .into_iter()
                .flat_map(|g| g.policies.iter())
                .filter(|p| {
                    &p.organization_id == organization_id
                        && p.policy_template_id
                            .as_ref()
                            .is_some_and(|t| template_ids.contains(t))
                })
                .cloned()
                .collect()
        }))
    }

    async fn tasks_for_templates(
        &mut self,
        organization_id: &OrganizationId,
        template_ids: &[TaskTemplateId],
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self.read(|layers| {
            layers
                .into_iter()
                .flat_map(|g| g.tasks.iter())
                .filter(|t| {
                    &t.organization_id == organization_id
                        && t.task_template_id
                            .as_ref()
                            .is_some_and(|id| template_ids.contains(id))
                })
                .cloned()
                .collect()
        }))
    }

    async fn requirement_maps_for_controls(
        &mut self,
        control_ids: &[ControlId],
    ) -> Result<Vec<RequirementMap>, StoreError> {
        Ok(self.read(|layers| {
            layers
                .into_iter()
                .flat_map(|g| g.requirement_maps.iter())
                .filter(|rm| control_ids.contains(&rm.control_id))
                .cloned()
                .collect()
        }))
    }

    async fn policy_links_for_controls(
        &mut self,
        control_ids: &[ControlId],
    ) -> Result<Vec<ControlPolicyLink>, StoreError> {
        Ok(self.read(|layers| {
            layers
                .into_iter()
                .flat_map(|g| g.policy_links.iter())
                .filter(|l| control_ids.contains(&l.control_id))
                .cloned()
                .collect()
        }))
    }

    async fn task_links_for_controls(
        &mut self,
        control_ids: &[ControlId],
    ) -> Result<Vec<ControlTaskLink>, StoreError> {
        Ok(self.read(|layers| {
            layers
                .into_iter()
                .flat_map(|g| g.task_links.iter())
                .filter(|l| control_ids.contains(&l.control_id))
                .cloned()
                .collect()
        }))
    }

    async fn insert_framework_instance(
        &mut self,
        row: &FrameworkInstance,
    ) -> Result<InsertOutcome, StoreError> {
        self.insert_rows(
            Table {
                entity: "framework_instance",
                point: FailPoint::InsertFrameworkInstance,
                key: |r: &FrameworkInstance| Some(framework_key(r)),
                exists: InstanceGraph::has_framework_instance,
                rows: |g| &mut g.framework_instances,
            },
            std::slice::from_ref(row),
        )
    }

    async fn insert_controls(&mut self, rows: &[Control]) -> Result<InsertOutcome, StoreError> {
        self.insert_rows(
            Table {
                entity: "control",
                point: FailPoint::InsertControls,
                key: control_key,
                exists: InstanceGraph::has_control,
                rows: |g| &mut g.controls,
            },
            rows,
        )
    }

    async fn insert_policies(&mut self, rows: &[Policy]) -> Result<InsertOutcome, StoreError> {
        self.insert_rows(
            Table {
                entity: "policy",
                point: FailPoint::InsertPolicies,
                key: policy_key,
                exists: InstanceGraph::has_policy,
                rows: |g| &mut g.policies,
            },
            rows,
        )
    }

    async fn insert_tasks(&mut self, rows: &[Task]) -> Result<InsertOutcome, StoreError> {
        self.insert_rows(
            Table {
                entity: "task",
                point: FailPoint::InsertTasks,
                key: task_key,
                exists: InstanceGraph::has_task,
                rows: |g| &mut g.tasks,
            },
            rows,
        )
    }

    async fn insert_requirement_maps(
        &mut self,
        rows: &[RequirementMap],
    ) -> Result<InsertOutcome, StoreError> {
        self.insert_rows(
            Table {
                entity: "requirement_map",
                point: FailPoint::InsertRequirementMaps,
                key: |r: &RequirementMap| Some(edge_key(r)),
                exists: InstanceGraph::has_requirement_map,
                rows: |g| &mut g.requirement_maps,
            },
            rows,
        )
    }

    async fn connect_policies(
        &mut self,
        links: &[ControlPolicyLink],
    ) -> Result<InsertOutcome, StoreError> {
        self.insert_rows(
            Table {
                entity: "control_policy",
                point: FailPoint::ConnectPolicies,
                key: |l: &ControlPolicyLink| Some(l.clone()),
                exists: InstanceGraph::has_policy_link,
                rows: |g| &mut g.policy_links,
            },
            links,
        )
    }

    async fn connect_tasks(
        &mut self,
        links: &[ControlTaskLink],
    ) -> Result<InsertOutcome, StoreError> {
        self.insert_rows(
            Table {
                entity: "control_task",
                point: FailPoint::ConnectTasks,
                key: |l: &ControlTaskLink| Some(l.clone()),
                exists: InstanceGraph::has_task_link,
                rows: |g| &mut g.task_links,
            },
            links,
        )
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTransaction { inner, staged } = self;
        let mut shared = inner.lock();
        if let Some(Fault::Fail) = shared.faults.take(FailPoint::Commit) {
            return Err(StoreError::Backend("injected failure at commit".into()));
        }
        let dropped = shared.instances.merge(staged);
        if dropped > 0 {
            tracing::debug!(dropped, "staged rows lost a commit race to a concurrent writer");
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
