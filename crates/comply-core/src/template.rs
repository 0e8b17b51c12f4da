//! # Template Catalog Records
//!
//! The shared, organization-agnostic catalog: frameworks and their
//! requirements, plus control, policy, and task templates. These records
//! are read-only from the point of view of materialization.
//!
//! Cross-references between control templates and requirements, policy
//! templates, and task templates are not embedded in the records
//! themselves. They are carried separately as [`ControlTemplateRelations`]
//! so the engine can build explicit adjacency lists.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::identity::{
    ControlTemplateId, FrameworkId, PolicyTemplateId, RequirementId, TaskTemplateId,
};

// ---------------------------------------------------------------------------
// Frameworks and requirements
// ---------------------------------------------------------------------------

/// A versioned compliance framework (SOC 2, ISO 27001, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framework {
    pub id: FrameworkId,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Unpublished frameworks are invisible to materialization.
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

/// A single requirement belonging to exactly one framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: RequirementId,
    pub framework_id: FrameworkId,
    /// Short code as printed in the framework text (e.g. `CC1.1`).
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A framework together with its requirements, as returned by a subgraph load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkWithRequirements {
    pub framework: Framework,
    pub requirements: Vec<Requirement>,
}

// ---------------------------------------------------------------------------
// Artifact templates
// ---------------------------------------------------------------------------

/// Control template. Many-to-many with requirements, policy templates and
/// task templates (see [`ControlTemplateRelations`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTemplate {
    pub id: ControlTemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Policy template. Content is a rich-text JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTemplate {
    pub id: PolicyTemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub department: Department,
    #[serde(default)]
    pub frequency: Option<Frequency>,
}

/// Task template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: TaskTemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub department: Department,
    #[serde(default)]
    pub frequency: Option<Frequency>,
}

/// The outgoing edges of one control template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTemplateRelations {
    pub control_template_id: ControlTemplateId,
    #[serde(default)]
    pub requirement_ids: Vec<RequirementId>,
    #[serde(default)]
    pub policy_template_ids: Vec<PolicyTemplateId>,
    #[serde(default)]
    pub task_template_ids: Vec<TaskTemplateId>,
}

// ---------------------------------------------------------------------------
// Department / Frequency
// ---------------------------------------------------------------------------

/// Owning department of a policy or task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    #[default]
    None,
    Admin,
    Gov,
    Hr,
    It,
    Itsm,
    Qms,
}

impl Department {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Admin => "admin",
            Self::Gov => "gov",
            Self::Hr => "hr",
            Self::It => "it",
            Self::Itsm => "itsm",
            Self::Qms => "qms",
        }
    }
}

impl std::fmt::Display for Department {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Department {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "admin" => Ok(Self::Admin),
            "gov" => Ok(Self::Gov),
            "hr" => Ok(Self::Hr),
            "it" => Ok(Self::It),
            "itsm" => Ok(Self::Itsm),
            "qms" => Ok(Self::Qms),
            other => Err(ParseError::UnknownVariant {
                kind: "department",
                value: other.to_string(),
            }),
        }
    }
}

/// Review cadence of a policy or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            other => Err(ParseError::UnknownVariant {
                kind: "frequency",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn department_round_trips_through_storage_form() {
        for dept in [
            Department::None,
            Department::Admin,
            Department::Gov,
            Department::Hr,
            Department::It,
            Department::Itsm,
            Department::Qms,
        ] {
            assert_eq!(dept.as_str().parse::<Department>().unwrap(), dept);
        }
    }

    #[test]
    fn unknown_frequency_is_rejected() {
        let err = "weekly".parse::<Frequency>().unwrap_err();
        assert!(err.to_string().contains("weekly"));
    }

    #[test]
    fn framework_defaults_to_visible() {
        let fw: Framework =
            serde_yaml::from_str("id: soc2\nname: SOC 2\nversion: '2017'\n").unwrap();
        assert!(fw.visible);
        assert!(fw.description.is_empty());
    }

    #[test]
    fn policy_template_defaults() {
        let tpl: PolicyTemplate = serde_yaml::from_str("id: p1\nname: Access Policy\n").unwrap();
        assert_eq!(tpl.department, Department::None);
        assert!(tpl.frequency.is_none());
        assert!(tpl.content.is_null());
    }
}
