//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use std::collections::HashSet;

use comply_core::{FrameworkId, OrganizationId};
use comply_engine::{Orchestrator, ReconcileRequest};
use comply_store::{CatalogSeed, InstanceGraph, MemoryDatabase};

pub const REFERENCE_CATALOG: &str = include_str!("../fixtures/reference_catalog.yaml");

pub fn reference_seed() -> CatalogSeed {
    CatalogSeed::from_yaml_str(REFERENCE_CATALOG).expect("reference catalog is valid")
}

pub fn reference_db() -> MemoryDatabase {
    MemoryDatabase::from_seed(&reference_seed())
}

pub fn orchestrator() -> Orchestrator<MemoryDatabase> {
    Orchestrator::new(reference_db())
}

pub fn org(id: &str) -> OrganizationId {
    OrganizationId::from(id)
}

pub fn add(organization: &str, frameworks: &[&str]) -> ReconcileRequest {
    ReconcileRequest::add_frameworks(
        org(organization),
        frameworks.iter().map(|f| FrameworkId::from(*f)),
    )
}

pub fn fix(organization: &str) -> ReconcileRequest {
    ReconcileRequest::fix_organization(org(organization))
}

/// Assert that no natural key is duplicated and every edge points at rows
/// of one organization.
pub fn assert_consistent(graph: &InstanceGraph) {
    let mut seen = HashSet::new();
    for fi in &graph.framework_instances {
        assert!(
            seen.insert((fi.organization_id.clone(), fi.framework_id.to_string())),
            "duplicate framework instance {fi:?}"
        );
    }
    let mut seen = HashSet::new();
    for c in &graph.controls {
        if let Some(tpl) = &c.control_template_id {
            assert!(
                seen.insert((c.organization_id.clone(), tpl.clone())),
                "duplicate control for template {tpl}"
            );
        }
    }
    let mut seen = HashSet::new();
    for p in &graph.policies {
        if let Some(tpl) = &p.policy_template_id {
            assert!(
                seen.insert((p.organization_id.clone(), tpl.clone())),
                "duplicate policy for template {tpl}"
            );
        }
    }
    let mut seen = HashSet::new();
    for t in &graph.tasks {
        if let Some(tpl) = &t.task_template_id {
            assert!(
                seen.insert((t.organization_id.clone(), tpl.clone())),
                "duplicate task for template {tpl}"
            );
        }
    }

    let mut seen = HashSet::new();
    for map in &graph.requirement_maps {
        assert!(seen.insert(map.key()), "duplicate requirement map {map:?}");
        let control = graph
            .controls
            .iter()
            .find(|c| c.id == map.control_id)
            .unwrap_or_else(|| panic!("requirement map {} has no control", map.id));
        let fi = graph
            .framework_instances
            .iter()
            .find(|fi| fi.id == map.framework_instance_id)
            .unwrap_or_else(|| panic!("requirement map {} has no framework instance", map.id));
        assert_eq!(control.organization_id, fi.organization_id);
    }

    for link in &graph.policy_links {
        let control = graph.controls.iter().find(|c| c.id == link.control_id);
        let policy = graph.policies.iter().find(|p| p.id == link.policy_id);
        match (control, policy) {
            (Some(c), Some(p)) => assert_eq!(c.organization_id, p.organization_id),
            _ => panic!("dangling policy link {link:?}"),
        }
    }
    for link in &graph.task_links {
        let control = graph.controls.iter().find(|c| c.id == link.control_id);
        let task = graph.tasks.iter().find(|t| t.id == link.task_id);
        match (control, task) {
            (Some(c), Some(t)) => assert_eq!(c.organization_id, t.organization_id),
            _ => panic!("dangling task link {link:?}"),
        }
    }
}
