//! # Template Catalog
//!
//! A typed, per-run snapshot of the part of the template catalog reachable
//! from a set of target frameworks.
//!
//! Records live in arenas (one `Vec` per kind, sorted by id and
//! deduplicated), and cross-references are adjacency lists of arena
//! indices. Reachability is a walk over these lists:
//!
//! ```text
//! Framework ─▶ Requirement ◀─┐
//!                            │ control_requirements
//!                     ControlTemplate ─┬─▶ PolicyTemplate   (control_policies)
//!                                      └─▶ TaskTemplate     (control_tasks)
//! ```
//!
//! A control template shared by two selected frameworks appears once in
//! the arena, with requirement edges into both.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use comply_core::{
    ControlTemplate, ControlTemplateId, ControlTemplateRelations, ErrorClass, Framework,
    FrameworkId, FrameworkWithRequirements, PolicyTemplate, PolicyTemplateId, Requirement,
    RequirementId, TaskTemplate, TaskTemplateId,
};
use comply_store::{StoreError, TemplateRepository};

/// Error while loading the catalog snapshot.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// None of the requested frameworks exists or is published.
    #[error("none of the requested frameworks is visible: {}", join(.0))]
    NoVisibleFrameworks(Vec<FrameworkId>),

    /// Some requested frameworks do not exist or are not published.
    #[error("frameworks not found or not published: {}", join(.0))]
    MissingFrameworks(Vec<FrameworkId>),

    /// The template repository failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CatalogError {
    /// Classify per the engine's propagation policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NoVisibleFrameworks(_) => ErrorClass::InvalidInput,
            Self::MissingFrameworks(_) => ErrorClass::NotFound,
            Self::Store(e) => e.class(),
        }
    }
}

pub(crate) fn join(ids: &[FrameworkId]) -> String {
    ids.iter()
        .map(FrameworkId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Snapshot of the catalog subgraph reachable from the target frameworks.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    frameworks: Vec<Framework>,
    requirements: Vec<Requirement>,
    controls: Vec<ControlTemplate>,
    policies: Vec<PolicyTemplate>,
    tasks: Vec<TaskTemplate>,

    framework_index: HashMap<FrameworkId, usize>,
    policy_index: HashMap<PolicyTemplateId, usize>,
    task_index: HashMap<TaskTemplateId, usize>,

    /// requirement → owning framework
    requirement_framework: Vec<usize>,
    /// control → requirements (within the selection)
    control_requirements: Vec<Vec<usize>>,
    /// control → policy templates
    control_policies: Vec<Vec<usize>>,
    /// control → task templates
    control_tasks: Vec<Vec<usize>>,
}

impl TemplateCatalog {
    /// Load the subgraph for `framework_ids` through `repo`.
    ///
    /// Fails with [`CatalogError::NoVisibleFrameworks`] when nothing
    /// resolves and [`CatalogError::MissingFrameworks`] when only part of
    /// the request does.
    pub async fn load<R>(repo: &mut R, framework_ids: &[FrameworkId]) -> Result<Self, CatalogError>
    where
        R: TemplateRepository + ?Sized,
    {
        let subgraph = repo.load_framework_subgraph(framework_ids).await?;

        let found: BTreeSet<&FrameworkId> = subgraph.iter().map(|fw| &fw.framework.id).collect();
        let missing: Vec<FrameworkId> = framework_ids
            .iter()
            .filter(|id| !found.contains(id))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if found.is_empty() {
            return Err(CatalogError::NoVisibleFrameworks(missing));
        }
        if !missing.is_empty() {
            return Err(CatalogError::MissingFrameworks(missing));
        }

        let requirement_ids: Vec<RequirementId> = subgraph
            .iter()
            .flat_map(|fw| fw.requirements.iter().map(|r| r.id.clone()))
            .collect();
        let controls = repo
            .load_control_templates_for_requirements(&requirement_ids)
            .await?;
        let control_ids: Vec<ControlTemplateId> = controls.iter().map(|c| c.id.clone()).collect();
        let relations = repo.load_control_template_relations(&control_ids).await?;
        let policies = repo.load_policy_templates_for_controls(&control_ids).await?;
        let tasks = repo.load_task_templates_for_controls(&control_ids).await?;

        let catalog = Self::build(subgraph, controls, policies, tasks, relations);
        tracing::debug!(
            frameworks = catalog.frameworks.len(),
            requirements = catalog.requirements.len(),
            controls = catalog.controls.len(),
            policies = catalog.policies.len(),
            tasks = catalog.tasks.len(),
            "template catalog loaded"
        );
        Ok(catalog)
    }

    /// Assemble a catalog from already-loaded records.
    ///
    /// Duplicate records collapse to one. Relations pointing outside the
    /// loaded records are dropped, and control templates left with no
    /// requirement in the selection are excluded.
    pub fn build(
        frameworks: Vec<FrameworkWithRequirements>,
        controls: Vec<ControlTemplate>,
        policies: Vec<PolicyTemplate>,
        tasks: Vec<TaskTemplate>,
        relations: Vec<ControlTemplateRelations>,
    ) -> Self {
        let mut framework_list = Vec::new();
        let mut requirement_list = Vec::new();
        for fw in frameworks {
            framework_list.push(fw.framework);
            requirement_list.extend(fw.requirements);
        }
        let frameworks = dedup_by_id(framework_list, |f| f.id.clone());
        let requirements = dedup_by_id(requirement_list, |r| r.id.clone());
        let policies = dedup_by_id(policies, |p| p.id.clone());
        let tasks = dedup_by_id(tasks, |t| t.id.clone());

        let framework_index = index_of(&frameworks, |f| f.id.clone());
        let policy_index = index_of(&policies, |p| p.id.clone());
        let task_index = index_of(&tasks, |t| t.id.clone());

        let requirements: Vec<Requirement> = requirements
            .into_iter()
            .filter(|r| framework_index.contains_key(&r.framework_id))
            .collect();
        let requirement_index = index_of(&requirements, |r| r.id.clone());
        let requirement_framework: Vec<usize> = requirements
            .iter()
            .filter_map(|r| framework_index.get(&r.framework_id).copied())
            .collect();

        let mut by_control: HashMap<ControlTemplateId, ControlTemplateRelations> = HashMap::new();
        for rel in relations {
            let entry = by_control
                .entry(rel.control_template_id.clone())
                .or_insert_with(|| ControlTemplateRelations {
                    control_template_id: rel.control_template_id.clone(),
                    requirement_ids: Vec::new(),
                    policy_template_ids: Vec::new(),
                    task_template_ids: Vec::new(),
                });
            entry.requirement_ids.extend(rel.requirement_ids);
            entry.policy_template_ids.extend(rel.policy_template_ids);
            entry.task_template_ids.extend(rel.task_template_ids);
        }

        let mut kept_controls = Vec::new();
        let mut control_requirements = Vec::new();
        let mut control_policies = Vec::new();
        let mut control_tasks = Vec::new();
        for control in dedup_by_id(controls, |c| c.id.clone()) {
            let Some(rel) = by_control.get(&control.id) else {
                continue;
            };
            let reqs = resolve(&rel.requirement_ids, &requirement_index);
            if reqs.is_empty() {
                continue;
            }
            control_requirements.push(reqs);
            control_policies.push(resolve(&rel.policy_template_ids, &policy_index));
            control_tasks.push(resolve(&rel.task_template_ids, &task_index));
            kept_controls.push(control);
        }

        Self {
            frameworks,
            requirements,
            controls: kept_controls,
            policies,
            tasks,
            framework_index,
            policy_index,
            task_index,
            requirement_framework,
            control_requirements,
            control_policies,
            control_tasks,
        }
    }

    /// Frameworks in the selection.
    pub fn frameworks(&self) -> &[Framework] {
        &self.frameworks
    }

    /// Ids of the frameworks in the selection.
    pub fn framework_ids(&self) -> Vec<FrameworkId> {
        self.frameworks.iter().map(|f| f.id.clone()).collect()
    }

    /// Whether `id` is one of the selected frameworks.
    pub fn contains_framework(&self, id: &FrameworkId) -> bool {
        self.framework_index.contains_key(id)
    }

    /// Requirements of the selected frameworks.
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Control templates reachable from the selected requirements.
    pub fn control_templates(&self) -> &[ControlTemplate] {
        &self.controls
    }

    /// Ids of every reachable control template.
    pub fn control_template_ids(&self) -> Vec<ControlTemplateId> {
        self.controls.iter().map(|c| c.id.clone()).collect()
    }

    /// Policy templates reachable from the control templates.
    pub fn policy_templates(&self) -> &[PolicyTemplate] {
        &self.policies
    }

    /// Ids of every reachable policy template.
    pub fn policy_template_ids(&self) -> Vec<PolicyTemplateId> {
        self.reachable(&self.control_policies, &self.policies, |p| p.id.clone())
    }

    /// Task templates reachable from the control templates.
    pub fn task_templates(&self) -> &[TaskTemplate] {
        &self.tasks
    }

    /// Ids of every reachable task template.
    pub fn task_template_ids(&self) -> Vec<TaskTemplateId> {
        self.reachable(&self.control_tasks, &self.tasks, |t| t.id.clone())
    }

    /// Look up a control template by id.
    pub fn control_template(&self, id: &ControlTemplateId) -> Option<&ControlTemplate> {
        self.controls
            .binary_search_by(|c| c.id.cmp(id))
            .ok()
            .map(|i| &self.controls[i])
    }

    /// Look up a policy template by id.
    pub fn policy_template(&self, id: &PolicyTemplateId) -> Option<&PolicyTemplate> {
        self.policy_index.get(id).map(|&i| &self.policies[i])
    }

    /// Look up a task template by id.
    pub fn task_template(&self, id: &TaskTemplateId) -> Option<&TaskTemplate> {
        self.task_index.get(id).map(|&i| &self.tasks[i])
    }

    /// Every `(control template, framework, requirement)` triple implied by
    /// the catalog: one per control-requirement pair.
    pub fn requirement_edges(
        &self,
    ) -> impl Iterator<Item = (&ControlTemplateId, &FrameworkId, &RequirementId)> + '_ {
        self.controls.iter().enumerate().flat_map(move |(ci, control)| {
            self.control_requirements[ci].iter().map(move |&ri| {
                let fw = &self.frameworks[self.requirement_framework[ri]];
                (&control.id, &fw.id, &self.requirements[ri].id)
            })
        })
    }

    /// Every `(control template, policy template)` connection.
    pub fn policy_edges(&self) -> impl Iterator<Item = (&ControlTemplateId, &PolicyTemplateId)> + '_ {
        self.controls.iter().enumerate().flat_map(move |(ci, control)| {
            self.control_policies[ci]
                .iter()
                .map(move |&pi| (&control.id, &self.policies[pi].id))
        })
    }

    /// Every `(control template, task template)` connection.
    pub fn task_edges(&self) -> impl Iterator<Item = (&ControlTemplateId, &TaskTemplateId)> + '_ {
        self.controls.iter().enumerate().flat_map(move |(ci, control)| {
            self.control_tasks[ci]
                .iter()
                .map(move |&ti| (&control.id, &self.tasks[ti].id))
        })
    }

    /// The first control template (in id order) that lists `task`.
    pub fn first_control_for_task(&self, task: &TaskTemplateId) -> Option<&ControlTemplateId> {
        let ti = *self.task_index.get(task)?;
        self.controls
            .iter()
            .zip(&self.control_tasks)
            .find(|(_, tasks)| tasks.contains(&ti))
            .map(|(control, _)| &control.id)
    }

    fn reachable<T, K>(&self, adjacency: &[Vec<usize>], arena: &[T], id: impl Fn(&T) -> K) -> Vec<K> {
        let indices: BTreeSet<usize> = adjacency.iter().flatten().copied().collect();
        indices.into_iter().map(|i| id(&arena[i])).collect()
    }
}

fn dedup_by_id<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items.dedup_by(|a, b| key(a) == key(b));
    items
}

fn index_of<T, K: std::hash::Hash + Eq>(items: &[T], key: impl Fn(&T) -> K) -> HashMap<K, usize> {
    items.iter().enumerate().map(|(i, item)| (key(item), i)).collect()
}

fn resolve<K: std::hash::Hash + Eq>(ids: &[K], index: &HashMap<K, usize>) -> Vec<usize> {
    let set: BTreeSet<usize> = ids.iter().filter_map(|id| index.get(id).copied()).collect();
    set.into_iter().collect()
}
