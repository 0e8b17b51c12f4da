//! # Diff Resolver
//!
//! Computes what is missing from an organization's instance graph relative
//! to a [`TemplateCatalog`].
//!
//! Resolution is split in two:
//!
//! 1. [`ExistingState::load`] reads, through the run's transaction, every
//!    instance row the catalog could map onto.
//! 2. [`resolve`] is a pure function of the catalog and that state.
//!
//! The full reachable set is recomputed on every call. A control that
//! already exists can still be missing a policy, task, requirement edge,
//! or connection that was added to its template later, and those are
//! planned like any other gap.
//!
//! Plans are expressed in template-id space: instance ids for rows that do
//! not exist yet are only known after the materializer writes them.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use comply_core::{
    ControlId, ControlPolicyLink, ControlTaskLink, ControlTemplateId, FrameworkId,
    FrameworkInstanceId, OrganizationId, PolicyId, PolicyTemplateId, RequirementId, TaskId,
    TaskTemplateId,
};
use comply_store::{InstanceRepository, StoreError};

use crate::catalog::TemplateCatalog;

// ---------------------------------------------------------------------------
// Existing state
// ---------------------------------------------------------------------------

/// Instance rows of one organization that the catalog can map onto, keyed
/// by template id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingState {
    pub framework_instances: HashMap<FrameworkId, FrameworkInstanceId>,
    pub controls: HashMap<ControlTemplateId, ControlId>,
    pub policies: HashMap<PolicyTemplateId, PolicyId>,
    pub tasks: HashMap<TaskTemplateId, TaskId>,
    pub requirement_maps: HashSet<(ControlId, FrameworkInstanceId, RequirementId)>,
    pub policy_links: HashSet<ControlPolicyLink>,
    pub task_links: HashSet<ControlTaskLink>,
}

impl ExistingState {
    /// Read the organization's rows for everything in `catalog`.
    pub async fn load<R>(
        repo: &mut R,
        organization_id: &OrganizationId,
        catalog: &TemplateCatalog,
    ) -> Result<Self, StoreError>
    where
        R: InstanceRepository + ?Sized,
    {
        let framework_instances = repo
            .framework_instances(organization_id, &catalog.framework_ids())
            .await?
            .into_iter()
            .map(|fi| (fi.framework_id, fi.id))
            .collect();

        let controls: HashMap<ControlTemplateId, ControlId> = repo
            .controls_for_templates(organization_id, &catalog.control_template_ids())
            .await?
            .into_iter()
            .filter_map(|c| Some((c.control_template_id?, c.id)))
            .collect();

        let policies = repo
            .policies_for_templates(organization_id, &catalog.policy_template_ids())
            .await?
            .into_iter()
            .filter_map(|p| Some((p.policy_template_id?, p.id)))
            .collect();

        let tasks = repo
            .tasks_for_templates(organization_id, &catalog.task_template_ids())
            .await?
            .into_iter()
            .filter_map(|t| Some((t.task_template_id?, t.id)))
            .collect();

        let control_ids: Vec<ControlId> = controls.values().cloned().collect();
        let (requirement_maps, policy_links, task_links) = if control_ids.is_empty() {
            Default::default()
        } else {
            let maps = repo
                .requirement_maps_for_controls(&control_ids)
                .await?
                .into_iter()
                .map(|rm| (rm.control_id, rm.framework_instance_id, rm.requirement_id))
                .collect();
            let policy_links = repo
                .policy_links_for_controls(&control_ids)
                .await?
                .into_iter()
                .collect();
            let task_links = repo
                .task_links_for_controls(&control_ids)
                .await?
                .into_iter()
                .collect();
            (maps, policy_links, task_links)
        };

        Ok(Self {
            framework_instances,
            controls,
            policies,
            tasks,
            requirement_maps,
            policy_links,
            task_links,
        })
    }

    fn has_requirement_map(
        &self,
        control: &ControlTemplateId,
        framework: &FrameworkId,
        requirement: &RequirementId,
    ) -> bool {
        match (self.controls.get(control), self.framework_instances.get(framework)) {
            (Some(c), Some(fi)) => self
                .requirement_maps
                .contains(&(c.clone(), fi.clone(), requirement.clone())),
            _ => false,
        }
    }

    fn has_policy_link(&self, control: &ControlTemplateId, policy: &PolicyTemplateId) -> bool {
        match (self.controls.get(control), self.policies.get(policy)) {
            (Some(c), Some(p)) => self.policy_links.contains(&ControlPolicyLink {
                control_id: c.clone(),
                policy_id: p.clone(),
            }),
            _ => false,
        }
    }

    fn has_task_link(&self, control: &ControlTemplateId, task: &TaskTemplateId) -> bool {
        match (self.controls.get(control), self.tasks.get(task)) {
            (Some(c), Some(t)) => self.task_links.contains(&ControlTaskLink {
                control_id: c.clone(),
                task_id: t.clone(),
            }),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A requirement-map edge to create, in template-id space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedEdge {
    pub control_template_id: ControlTemplateId,
    pub framework_id: FrameworkId,
    pub requirement_id: RequirementId,
}

/// A control→policy connection to create.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedPolicyLink {
    pub control_template_id: ControlTemplateId,
    pub policy_template_id: PolicyTemplateId,
}

/// A control→task connection to create.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTaskLink {
    pub control_template_id: ControlTemplateId,
    pub task_template_id: TaskTemplateId,
}

/// Everything missing from one organization's instance graph. Each list is
/// sorted and free of duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializationPlan {
    pub framework_instances_to_create: Vec<FrameworkId>,
    pub controls_to_create: Vec<ControlTemplateId>,
    pub policies_to_create: Vec<PolicyTemplateId>,
    pub tasks_to_create: Vec<TaskTemplateId>,
    pub requirement_map_edges_to_create: Vec<PlannedEdge>,
    pub policy_links_to_create: Vec<PlannedPolicyLink>,
    pub task_links_to_create: Vec<PlannedTaskLink>,
}

impl MaterializationPlan {
    /// Whether the instance graph is already complete.
    pub fn is_empty(&self) -> bool {
        self.framework_instances_to_create.is_empty()
            && self.controls_to_create.is_empty()
            && self.policies_to_create.is_empty()
            && self.tasks_to_create.is_empty()
            && self.requirement_map_edges_to_create.is_empty()
            && self.policy_links_to_create.is_empty()
            && self.task_links_to_create.is_empty()
    }
}

/// Diff `catalog` against `existing`.
pub fn resolve(catalog: &TemplateCatalog, existing: &ExistingState) -> MaterializationPlan {
    let framework_instances_to_create = missing(
        catalog.framework_ids(),
        |id| existing.framework_instances.contains_key(id),
    );
    let controls_to_create = missing(catalog.control_template_ids(), |id| {
        existing.controls.contains_key(id)
    });
    let policies_to_create = missing(catalog.policy_template_ids(), |id| {
        existing.policies.contains_key(id)
    });
    let tasks_to_create = missing(catalog.task_template_ids(), |id| {
        existing.tasks.contains_key(id)
    });

    let requirement_map_edges_to_create: BTreeSet<PlannedEdge> = catalog
        .requirement_edges()
        .filter(|(c, f, r)| !existing.has_requirement_map(c, f, r))
        .map(|(c, f, r)| PlannedEdge {
            control_template_id: c.clone(),
            framework_id: f.clone(),
            requirement_id: r.clone(),
        })
        .collect();

    let policy_links_to_create: BTreeSet<PlannedPolicyLink> = catalog
        .policy_edges()
        .filter(|(c, p)| !existing.has_policy_link(c, p))
        .map(|(c, p)| PlannedPolicyLink {
            control_template_id: c.clone(),
            policy_template_id: p.clone(),
        })
        .collect();

    let task_links_to_create: BTreeSet<PlannedTaskLink> = catalog
        .task_edges()
        .filter(|(c, t)| !existing.has_task_link(c, t))
        .map(|(c, t)| PlannedTaskLink {
            control_template_id: c.clone(),
            task_template_id: t.clone(),
        })
        .collect();

    MaterializationPlan {
        framework_instances_to_create,
        controls_to_create,
        policies_to_create,
        tasks_to_create,
        requirement_map_edges_to_create: requirement_map_edges_to_create.into_iter().collect(),
        policy_links_to_create: policy_links_to_create.into_iter().collect(),
        task_links_to_create: task_links_to_create.into_iter().collect(),
    }
}

fn missing<K: Ord>(ids: Vec<K>, exists: impl Fn(&K) -> bool) -> Vec<K> {
    let set: BTreeSet<K> = ids.into_iter().filter(|id| !exists(id)).collect();
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use comply_core::{
        ControlTemplate, ControlTemplateRelations, Department, Framework,
        FrameworkWithRequirements, PolicyTemplate, Requirement, TaskTemplate,
    };
    use proptest::prelude::*;

    fn catalog(
        frameworks: &[(&str, &[&str])],
        controls: &[(&str, &[&str], &[&str], &[&str])],
    ) -> TemplateCatalog {
        let fws = frameworks
            .iter()
            .map(|(fw, reqs)| FrameworkWithRequirements {
                framework: Framework {
                    id: FrameworkId::from(*fw),
                    name: fw.to_string(),
                    version: "1".into(),
                    description: String::new(),
                    visible: true,
                },
                requirements: reqs
                    .iter()
                    .map(|r| Requirement {
                        id: RequirementId::from(*r),
                        framework_id: FrameworkId::from(*fw),
                        identifier: r.to_string(),
                        name: String::new(),
                        description: String::new(),
                    })
                    .collect(),
            })
            .collect();
        let mut policies = BTreeSet::new();
        let mut tasks = BTreeSet::new();
        let mut templates = Vec::new();
        let mut relations = Vec::new();
        for (ct, reqs, pols, tsks) in controls {
            templates.push(ControlTemplate {
                id: ControlTemplateId::from(*ct),
                name: ct.to_string(),
                description: String::new(),
            });
            policies.extend(pols.iter().copied());
            tasks.extend(tsks.iter().copied());
            relations.push(ControlTemplateRelations {
                control_template_id: ControlTemplateId::from(*ct),
                requirement_ids: reqs.iter().map(|r| RequirementId::from(*r)).collect(),
                policy_template_ids: pols.iter().map(|p| PolicyTemplateId::from(*p)).collect(),
                task_template_ids: tsks.iter().map(|t| TaskTemplateId::from(*t)).collect(),
            });
        }
        TemplateCatalog::build(
            fws,
            templates,
            policies
                .into_iter()
                .map(|p| PolicyTemplate {
                    id: PolicyTemplateId::from(p),
                    name: p.to_string(),
                    description: String::new(),
                    content: serde_json::Value::Null,
                    department: Department::None,
                    frequency: None,
                })
                .collect(),
            tasks
                .into_iter()
                .map(|t| TaskTemplate {
                    id: TaskTemplateId::from(t),
                    name: t.to_string(),
                    description: String::new(),
                    department: Department::None,
                    frequency: None,
                })
                .collect(),
            relations,
        )
    }

    /// Pretend every planned row was written and return the resulting state.
    fn apply_plan(plan: &MaterializationPlan, mut state: ExistingState) -> ExistingState {
        for fw in &plan.framework_instances_to_create {
            state
                .framework_instances
                .insert(fw.clone(), FrameworkInstanceId::new(format!("frk_{fw}")));
        }
        for ct in &plan.controls_to_create {
            state.controls.insert(ct.clone(), ControlId::new(format!("ctl_{ct}")));
        }
        for pt in &plan.policies_to_create {
            state.policies.insert(pt.clone(), PolicyId::new(format!("pol_{pt}")));
        }
        for tt in &plan.tasks_to_create {
            state.tasks.insert(tt.clone(), TaskId::new(format!("tsk_{tt}")));
        }
        for edge in &plan.requirement_map_edges_to_create {
            state.requirement_maps.insert((
                state.controls[&edge.control_template_id].clone(),
                state.framework_instances[&edge.framework_id].clone(),
                edge.requirement_id.clone(),
            ));
        }
        for link in &plan.policy_links_to_create {
            state.policy_links.insert(ControlPolicyLink {
                control_id: state.controls[&link.control_template_id].clone(),
                policy_id: state.policies[&link.policy_template_id].clone(),
            });
        }
        for link in &plan.task_links_to_create {
            state.task_links.insert(ControlTaskLink {
                control_id: state.controls[&link.control_template_id].clone(),
                task_id: state.tasks[&link.task_template_id].clone(),
            });
        }
        state
    }

    #[test]
    fn empty_organization_plans_everything() {
        let catalog = catalog(
            &[("soc2", &["cc1", "cc2", "cc3"])],
            &[
                ("ct_a", &["cc1"], &["pt_a"], &["tt_a"]),
                ("ct_b", &["cc2"], &[], &[]),
                ("ct_c", &["cc3"], &[], &[]),
            ],
        );
        let plan = resolve(&catalog, &ExistingState::default());
        assert_eq!(plan.framework_instances_to_create, vec![FrameworkId::from("soc2")]);
        assert_eq!(plan.controls_to_create.len(), 3);
        assert_eq!(plan.policies_to_create.len(), 1);
        assert_eq!(plan.tasks_to_create.len(), 1);
        assert_eq!(plan.requirement_map_edges_to_create.len(), 3);
        assert_eq!(plan.policy_links_to_create.len(), 1);
        assert_eq!(plan.task_links_to_create.len(), 1);
    }

    #[test]
    fn shared_control_is_planned_once_with_two_edges() {
        let catalog = catalog(
            &[("soc2", &["cc1"]), ("iso", &["a5"])],
            &[("ct_shared", &["cc1", "a5"], &[], &[])],
        );
        let plan = resolve(&catalog, &ExistingState::default());
        assert_eq!(plan.controls_to_create, vec![ControlTemplateId::from("ct_shared")]);
        assert_eq!(plan.requirement_map_edges_to_create.len(), 2);
    }

    #[test]
    fn existing_control_still_gets_new_policy() {
        let catalog = catalog(
            &[("soc2", &["cc1"])],
            &[("ct_a", &["cc1"], &["pt_new"], &[])],
        );
        let mut existing = ExistingState::default();
        existing
            .framework_instances
            .insert(FrameworkId::from("soc2"), FrameworkInstanceId::from("frk_1"));
        existing
            .controls
            .insert(ControlTemplateId::from("ct_a"), ControlId::from("ctl_1"));
        existing.requirement_maps.insert((
            ControlId::from("ctl_1"),
            FrameworkInstanceId::from("frk_1"),
            RequirementId::from("cc1"),
        ));

        let plan = resolve(&catalog, &existing);
        assert!(plan.controls_to_create.is_empty());
        assert!(plan.requirement_map_edges_to_create.is_empty());
        assert_eq!(plan.policies_to_create, vec![PolicyTemplateId::from("pt_new")]);
        assert_eq!(plan.policy_links_to_create.len(), 1);
    }

    #[test]
    fn existing_policy_missing_link_plans_only_the_link() {
        let catalog = catalog(
            &[("soc2", &["cc1"])],
            &[("ct_a", &["cc1"], &["pt_a"], &[])],
        );
        let mut existing = ExistingState::default();
        existing
            .controls
            .insert(ControlTemplateId::from("ct_a"), ControlId::from("ctl_1"));
        existing
            .policies
            .insert(PolicyTemplateId::from("pt_a"), PolicyId::from("pol_1"));

        let plan = resolve(&catalog, &existing);
        assert!(plan.policies_to_create.is_empty());
        assert_eq!(
            plan.policy_links_to_create,
            vec![PlannedPolicyLink {
                control_template_id: ControlTemplateId::from("ct_a"),
                policy_template_id: PolicyTemplateId::from("pt_a"),
            }]
        );
    }

    #[test]
    fn applied_plan_resolves_to_empty() {
        let catalog = catalog(
            &[("soc2", &["cc1", "cc2"])],
            &[
                ("ct_a", &["cc1", "cc2"], &["pt_a"], &["tt_a"]),
                ("ct_b", &["cc2"], &["pt_a"], &[]),
            ],
        );
        let plan = resolve(&catalog, &ExistingState::default());
        let after = apply_plan(&plan, ExistingState::default());
        assert!(resolve(&catalog, &after).is_empty());
    }

    #[test]
    fn plan_serializes_camel_case() {
        let catalog = catalog(&[("soc2", &["cc1"])], &[("ct_a", &["cc1"], &[], &[])]);
        let json = serde_json::to_value(resolve(&catalog, &ExistingState::default())).unwrap();
        assert_eq!(json["frameworkInstancesToCreate"][0], "soc2");
        assert_eq!(json["requirementMapEdgesToCreate"][0]["controlTemplateId"], "ct_a");
    }

    // ── Property tests ──────────────────────────────────────────────

    const REQS: [&str; 6] = ["r0", "r1", "r2", "r3", "r4", "r5"];
    const POLS: [&str; 3] = ["p0", "p1", "p2"];
    const TSKS: [&str; 3] = ["t0", "t1", "t2"];

    type ControlShape = (Vec<usize>, Vec<usize>, Vec<usize>);

    fn control_shape() -> impl Strategy<Value = ControlShape> {
        (
            prop::collection::vec(0..REQS.len(), 0..4),
            prop::collection::vec(0..POLS.len(), 0..3),
            prop::collection::vec(0..TSKS.len(), 0..3),
        )
    }

    fn generated_catalog(shapes: &[ControlShape]) -> TemplateCatalog {
        let names: Vec<String> = (0..shapes.len()).map(|i| format!("ct{i}")).collect();
        let picked: Vec<(Vec<&str>, Vec<&str>, Vec<&str>)> = shapes
            .iter()
            .map(|(r, p, t)| (pick(r, &REQS[..]), pick(p, &POLS[..]), pick(t, &TSKS[..])))
            .collect();
        let controls: Vec<(&str, &[&str], &[&str], &[&str])> = names
            .iter()
            .zip(&picked)
            .map(|(n, (r, p, t))| (n.as_str(), r.as_slice(), p.as_slice(), t.as_slice()))
            .collect();
        catalog(&[("fa", &REQS[..3]), ("fb", &REQS[3..])], &controls)
    }

    fn pick(idx: &[usize], from: &[&'static str]) -> Vec<&'static str> {
        idx.iter().map(|&i| from[i]).collect()
    }

    proptest! {
        #[test]
        fn resolving_after_applying_is_empty(shapes in prop::collection::vec(control_shape(), 0..8)) {
            let catalog = generated_catalog(&shapes);
            let plan = resolve(&catalog, &ExistingState::default());
            let after = apply_plan(&plan, ExistingState::default());
            prop_assert!(resolve(&catalog, &after).is_empty());
        }

        #[test]
        fn plan_never_contains_duplicates(shapes in prop::collection::vec(control_shape(), 0..8)) {
            let catalog = generated_catalog(&shapes);
            let plan = resolve(&catalog, &ExistingState::default());
            let edges: BTreeSet<_> = plan.requirement_map_edges_to_create.iter().collect();
            prop_assert_eq!(edges.len(), plan.requirement_map_edges_to_create.len());
            let controls: BTreeSet<_> = plan.controls_to_create.iter().collect();
            prop_assert_eq!(controls.len(), plan.controls_to_create.len());
        }
    }
}
