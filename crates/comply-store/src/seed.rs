//! # Catalog Seeds
//!
//! A serializable snapshot of the template catalog (plus the organizations
//! that exist), used to populate the in-memory backend for tests and for
//! `comply simulate`. Control templates list their relations inline:
//!
//! ```yaml
//! organizations: [org_1]
//! frameworks:
//!   - id: soc2
//!     name: SOC 2
//!     version: "2017"
//!     requirements:
//!       - { id: soc2_cc6_1, identifier: CC6.1, name: Logical access }
//! control_templates:
//!   - id: ct_access
//!     name: Access Control
//!     requirements: [soc2_cc6_1]
//!     policies: [pt_access]
//!     tasks: [tt_access_review]
//! policy_templates:
//!   - { id: pt_access, name: Access Control Policy, department: it }
//! task_templates:
//!   - { id: tt_access_review, name: Access review, frequency: quarterly }
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use comply_core::{
    ControlTemplate, ControlTemplateRelations, Framework, FrameworkWithRequirements,
    OrganizationId, PolicyTemplate, PolicyTemplateId, Requirement, RequirementId, TaskTemplate,
    TaskTemplateId,
};

/// Error while loading or validating a seed.
#[derive(Error, Debug)]
pub enum SeedError {
    /// The document is not valid YAML/JSON for the seed shape.
    #[error("malformed catalog seed: {0}")]
    Malformed(#[from] serde_yaml::Error),

    /// A control template references an id the seed does not define.
    #[error("control template {control_template} references unknown {kind} {id}")]
    DanglingReference {
        control_template: String,
        kind: &'static str,
        id: String,
    },

    /// The same id is defined twice.
    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: String },
}

/// A requirement as written inside its framework (framework id implied).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRequirement {
    pub id: RequirementId,
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A framework with its requirements nested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFramework {
    #[serde(flatten)]
    pub framework: Framework,
    #[serde(default)]
    pub requirements: Vec<SeedRequirement>,
}

/// A control template with its relations inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedControlTemplate {
    #[serde(flatten)]
    pub template: ControlTemplate,
    #[serde(default)]
    pub requirements: Vec<RequirementId>,
    #[serde(default)]
    pub policies: Vec<PolicyTemplateId>,
    #[serde(default)]
    pub tasks: Vec<TaskTemplateId>,
}

/// Complete catalog snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub organizations: Vec<OrganizationId>,
    #[serde(default)]
    pub frameworks: Vec<SeedFramework>,
    #[serde(default)]
    pub control_templates: Vec<SeedControlTemplate>,
    #[serde(default)]
    pub policy_templates: Vec<PolicyTemplate>,
    #[serde(default)]
    pub task_templates: Vec<TaskTemplate>,
}

impl CatalogSeed {
    /// Parse and validate a YAML (or JSON) seed document.
    pub fn from_yaml_str(doc: &str) -> Result<Self, SeedError> {
        let seed: Self = serde_yaml::from_str(doc)?;
        seed.validate()?;
        Ok(seed)
    }

    /// Check id uniqueness and that every relation points at a defined id.
    pub fn validate(&self) -> Result<(), SeedError> {
        let mut frameworks = BTreeSet::new();
        let mut requirements = BTreeSet::new();
        for fw in &self.frameworks {
            if !frameworks.insert(fw.framework.id.as_str()) {
                return Err(duplicate("framework", fw.framework.id.as_str()));
            }
            for req in &fw.requirements {
                if !requirements.insert(req.id.as_str()) {
                    return Err(duplicate("requirement", req.id.as_str()));
                }
            }
        }

        let policies = unique_ids(
            "policy template",
            self.policy_templates.iter().map(|p| p.id.as_str()),
        )?;
        let tasks = unique_ids(
            "task template",
            self.task_templates.iter().map(|t| t.id.as_str()),
        )?;
        unique_ids(
            "control template",
            self.control_templates.iter().map(|c| c.template.id.as_str()),
        )?;

        for ct in &self.control_templates {
            let check = |kind: &'static str, known: &BTreeSet<&str>, id: &str| {
                if known.contains(id) {
                    Ok(())
                } else {
                    Err(SeedError::DanglingReference {
                        control_template: ct.template.id.to_string(),
                        kind,
                        id: id.to_string(),
                    })
                }
            };
            for id in &ct.requirements {
                check("requirement", &requirements, id.as_str())?;
            }
            for id in &ct.policies {
                check("policy template", &policies, id.as_str())?;
            }
            for id in &ct.tasks {
                check("task template", &tasks, id.as_str())?;
            }
        }
        Ok(())
    }

    /// Frameworks with their requirements, framework id filled in.
    pub fn frameworks_with_requirements(&self) -> Vec<FrameworkWithRequirements> {
        self.frameworks
            .iter()
            .map(|fw| FrameworkWithRequirements {
                framework: fw.framework.clone(),
                requirements: fw
                    .requirements
                    .iter()
                    .map(|r| Requirement {
                        id: r.id.clone(),
                        framework_id: fw.framework.id.clone(),
                        identifier: r.identifier.clone(),
                        name: r.name.clone(),
                        description: r.description.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Relation lists of every control template.
    pub fn relations(&self) -> Vec<ControlTemplateRelations> {
        self.control_templates
            .iter()
            .map(|ct| ControlTemplateRelations {
                control_template_id: ct.template.id.clone(),
                requirement_ids: ct.requirements.clone(),
                policy_template_ids: ct.policies.clone(),
                task_template_ids: ct.tasks.clone(),
            })
            .collect()
    }
}

fn duplicate(kind: &'static str, id: &str) -> SeedError {
    SeedError::DuplicateId {
        kind,
        id: id.to_string(),
    }
}

fn unique_ids<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<BTreeSet<&'a str>, SeedError> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(duplicate(kind, id));
        }
    }
    Ok(seen)
}
