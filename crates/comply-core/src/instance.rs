//! # Instance Graph Records
//!
//! Organization-scoped rows materialized from the template catalog.
//!
//! ## Natural identity
//!
//! | Record              | Dedup key                                          |
//! |---------------------|----------------------------------------------------|
//! | `FrameworkInstance` | `(organization_id, framework_id)`                  |
//! | `Control`           | `(organization_id, control_template_id)`           |
//! | `Policy`            | `(organization_id, policy_template_id)`            |
//! | `Task`              | `(organization_id, task_template_id)`              |
//! | `RequirementMap`    | `(control_id, framework_instance_id, requirement_id)` |
//! | `ControlPolicyLink` | `(control_id, policy_id)`                          |
//! | `ControlTaskLink`   | `(control_id, task_id)`                            |
//!
//! Rows with no template reference (hand-authored controls, policies, or
//! tasks) are never considered by the dedup keys above.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::identity::{
    ControlId, ControlTemplateId, FrameworkId, FrameworkInstanceId, OrganizationId, PolicyId,
    PolicyTemplateId, RequirementId, RequirementMapId, TaskId, TaskTemplateId,
};
use crate::template::{ControlTemplate, Department, Frequency, PolicyTemplate, TaskTemplate};

/// One framework adopted by one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkInstance {
    pub id: FrameworkInstanceId,
    pub organization_id: OrganizationId,
    pub framework_id: FrameworkId,
    pub created_at: DateTime<Utc>,
}

impl FrameworkInstance {
    /// A fresh, not-yet-persisted instance of `framework_id`.
    pub fn new(organization_id: OrganizationId, framework_id: FrameworkId) -> Self {
        Self {
            id: FrameworkInstanceId::generate(),
            organization_id,
            framework_id,
            created_at: Utc::now(),
        }
    }
}

/// Organization-scoped control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub id: ControlId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: String,
    pub control_template_id: Option<ControlTemplateId>,
    pub created_at: DateTime<Utc>,
}

impl Control {
    /// Materialize a control from its template.
    pub fn from_template(organization_id: OrganizationId, template: &ControlTemplate) -> Self {
        Self {
            id: ControlId::generate(),
            organization_id,
            name: template.name.clone(),
            description: template.description.clone(),
            control_template_id: Some(template.id.clone()),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle status of a policy document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    #[default]
    Draft,
    Published,
    NeedsReview,
}

impl PolicyStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::NeedsReview => "needs_review",
        }
    }
}

impl std::str::FromStr for PolicyStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "needs_review" => Ok(Self::NeedsReview),
            other => Err(ParseError::UnknownVariant {
                kind: "policy status",
                value: other.to_string(),
            }),
        }
    }
}

/// Organization-scoped policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: String,
    pub content: serde_json::Value,
    pub department: Department,
    pub frequency: Option<Frequency>,
    pub status: PolicyStatus,
    pub policy_template_id: Option<PolicyTemplateId>,
    pub created_at: DateTime<Utc>,
}

impl Policy {
    /// Materialize a draft policy from its template.
    pub fn from_template(organization_id: OrganizationId, template: &PolicyTemplate) -> Self {
        Self {
            id: PolicyId::generate(),
            organization_id,
            name: template.name.clone(),
            description: template.description.clone(),
            content: template.content.clone(),
            department: template.department,
            frequency: template.frequency,
            status: PolicyStatus::Draft,
            policy_template_id: Some(template.id.clone()),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    NotRelevant,
}

impl TaskStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::NotRelevant => "not_relevant",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "not_relevant" => Ok(Self::NotRelevant),
            other => Err(ParseError::UnknownVariant {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// Organization-scoped task, anchored to the control that introduced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub organization_id: OrganizationId,
    pub title: String,
    pub description: String,
    pub department: Department,
    pub frequency: Option<Frequency>,
    pub status: TaskStatus,
    pub task_template_id: Option<TaskTemplateId>,
    /// The control this task was materialized for.
    pub entity_id: Option<ControlId>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Materialize an open task from its template.
    pub fn from_template(
        organization_id: OrganizationId,
        template: &TaskTemplate,
        entity_id: Option<ControlId>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            organization_id,
            title: template.name.clone(),
            description: template.description.clone(),
            department: template.department,
            frequency: template.frequency,
            status: TaskStatus::Todo,
            task_template_id: Some(template.id.clone()),
            entity_id,
            created_at: Utc::now(),
        }
    }
}

/// Edge asserting that a control satisfies a requirement under one
/// framework instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementMap {
    pub id: RequirementMapId,
    pub control_id: ControlId,
    pub framework_instance_id: FrameworkInstanceId,
    pub requirement_id: RequirementId,
}

impl RequirementMap {
    /// A fresh edge row.
    pub fn new(
        control_id: ControlId,
        framework_instance_id: FrameworkInstanceId,
        requirement_id: RequirementId,
    ) -> Self {
        Self {
            id: RequirementMapId::generate(),
            control_id,
            framework_instance_id,
            requirement_id,
        }
    }

    /// The natural dedup key of this edge.
    pub fn key(&self) -> (&ControlId, &FrameworkInstanceId, &RequirementId) {
        (&self.control_id, &self.framework_instance_id, &self.requirement_id)
    }
}

/// Control ↔ Policy connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ControlPolicyLink {
    pub control_id: ControlId,
    pub policy_id: PolicyId,
}

/// Control ↔ Task connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ControlTaskLink {
    pub control_id: ControlId,
    pub task_id: TaskId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> OrganizationId {
        OrganizationId::from("org_1")
    }

    #[test]
    fn control_from_template_keeps_back_reference() {
        let tpl = ControlTemplate {
            id: ControlTemplateId::from("ct_access"),
            name: "Access Control".into(),
            description: "Restrict access".into(),
        };
        let control = Control::from_template(org(), &tpl);
        assert_eq!(control.control_template_id, Some(tpl.id.clone()));
        assert_eq!(control.name, "Access Control");
        assert_eq!(control.organization_id, org());
    }

    #[test]
    fn new_policies_start_as_drafts() {
        let tpl = PolicyTemplate {
            id: PolicyTemplateId::from("pt_access"),
            name: "Access Policy".into(),
            description: String::new(),
            content: serde_json::json!({"type": "doc"}),
            department: Department::It,
            frequency: Some(Frequency::Yearly),
        };
        let policy = Policy::from_template(org(), &tpl);
        assert_eq!(policy.status, PolicyStatus::Draft);
        assert_eq!(policy.content, tpl.content);
        assert_eq!(policy.department, Department::It);
    }

    #[test]
    fn new_tasks_start_open_and_anchor_to_control() {
        let tpl = TaskTemplate {
            id: TaskTemplateId::from("tt_review"),
            name: "Quarterly access review".into(),
            description: String::new(),
            department: Department::It,
            frequency: Some(Frequency::Quarterly),
        };
        let control_id = ControlId::generate();
        let task = Task::from_template(org(), &tpl, Some(control_id.clone()));
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.title, "Quarterly access review");
        assert_eq!(task.entity_id, Some(control_id));
    }

    #[test]
    fn statuses_round_trip_through_storage_form() {
        for s in [PolicyStatus::Draft, PolicyStatus::Published, PolicyStatus::NeedsReview] {
            assert_eq!(s.as_str().parse::<PolicyStatus>().unwrap(), s);
        }
        for s in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::NotRelevant,
        ] {
            assert_eq!(s.as_str().parse::<TaskStatus>().unwrap(), s);
        }
    }
}
