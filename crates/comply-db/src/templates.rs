//! Template catalog queries.
//!
//! All functions are pure reads over the catalog tables and take the
//! run's connection so they observe the transaction's snapshot.

use std::collections::BTreeMap;

use sqlx::PgConnection;

use comply_core::{
    ControlTemplate, ControlTemplateId, ControlTemplateRelations, Framework, FrameworkId,
    FrameworkWithRequirements, PolicyTemplate, PolicyTemplateId, Requirement, RequirementId,
    TaskTemplate, TaskTemplateId,
};
use comply_store::StoreError;

use crate::error::backend;

pub(crate) fn strings<T: AsRef<str>>(ids: &[T]) -> Vec<String> {
    ids.iter().map(|id| id.as_ref().to_string()).collect()
}

/// Visible frameworks among `ids`, each with its requirements.
pub async fn load_framework_subgraph(
    conn: &mut PgConnection,
    ids: &[FrameworkId],
) -> Result<Vec<FrameworkWithRequirements>, StoreError> {
    let frameworks = sqlx::query_as::<_, FrameworkRow>(
        "SELECT id, name, version, description, visible
         FROM frameworks WHERE id = ANY($1) AND visible ORDER BY id",
    )
    .bind(strings(ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    let visible: Vec<String> = frameworks.iter().map(|f| f.id.clone()).collect();
    let requirements = sqlx::query_as::<_, RequirementRow>(
        "SELECT id, framework_id, identifier, name, description
         FROM requirements WHERE framework_id = ANY($1) ORDER BY id",
    )
    .bind(&visible)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    let mut by_framework: BTreeMap<String, Vec<Requirement>> = BTreeMap::new();
    for row in requirements {
        by_framework
            .entry(row.framework_id.clone())
            .or_default()
            .push(row.into_record());
    }

    Ok(frameworks
        .into_iter()
        .map(|row| {
            let requirements = by_framework.remove(&row.id).unwrap_or_default();
            FrameworkWithRequirements {
                framework: row.into_record(),
                requirements,
            }
        })
        .collect())
}

/// Control templates linked to any of `requirement_ids`.
pub async fn load_control_templates_for_requirements(
    conn: &mut PgConnection,
    requirement_ids: &[RequirementId],
) -> Result<Vec<ControlTemplate>, StoreError> {
    let rows = sqlx::query_as::<_, ControlTemplateRow>(
        "SELECT DISTINCT ct.id, ct.name, ct.description
         FROM control_templates ct
         JOIN control_template_requirements ctr ON ctr.control_template_id = ct.id
         WHERE ctr.requirement_id = ANY($1)
         ORDER BY ct.id",
    )
    .bind(strings(requirement_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    Ok(rows.into_iter().map(ControlTemplateRow::into_record).collect())
}

/// Policy templates linked to any of `control_template_ids`.
pub async fn load_policy_templates_for_controls(
    conn: &mut PgConnection,
    control_template_ids: &[ControlTemplateId],
) -> Result<Vec<PolicyTemplate>, StoreError> {
    let rows = sqlx::query_as::<_, PolicyTemplateRow>(
        "SELECT DISTINCT pt.id, pt.name, pt.description, pt.content, pt.department, pt.frequency
         FROM policy_templates pt
         JOIN control_template_policies ctp ON ctp.policy_template_id = pt.id
         WHERE ctp.control_template_id = ANY($1)
         ORDER BY pt.id",
    )
    .bind(strings(control_template_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    rows.into_iter().map(PolicyTemplateRow::into_record).collect()
}

/// Task templates linked to any of `control_template_ids`.
pub async fn load_task_templates_for_controls(
    conn: &mut PgConnection,
    control_template_ids: &[ControlTemplateId],
) -> Result<Vec<TaskTemplate>, StoreError> {
    let rows = sqlx::query_as::<_, TaskTemplateRow>(
        "SELECT DISTINCT tt.id, tt.name, tt.description, tt.department, tt.frequency
         FROM task_templates tt
         JOIN control_template_tasks ctt ON ctt.task_template_id = tt.id
         WHERE ctt.control_template_id = ANY($1)
         ORDER BY tt.id",
    )
    .bind(strings(control_template_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    rows.into_iter().map(TaskTemplateRow::into_record).collect()
}

/// Outgoing edges of each of `control_template_ids`.
pub async fn load_control_template_relations(
    conn: &mut PgConnection,
    control_template_ids: &[ControlTemplateId],
) -> Result<Vec<ControlTemplateRelations>, StoreError> {
    let ids = strings(control_template_ids);
    let mut relations: BTreeMap<String, ControlTemplateRelations> = ids
        .iter()
        .map(|id| {
            (
                id.clone(),
                ControlTemplateRelations {
                    control_template_id: ControlTemplateId::new(id.clone()),
                    requirement_ids: Vec::new(),
                    policy_template_ids: Vec::new(),
                    task_template_ids: Vec::new(),
                },
            )
        })
        .collect();

    let edges: Vec<(String, String)> = sqlx::query_as(
        "SELECT control_template_id, requirement_id FROM control_template_requirements
         WHERE control_template_id = ANY($1) ORDER BY control_template_id, requirement_id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    for (ct, req) in edges {
        if let Some(rel) = relations.get_mut(&ct) {
            rel.requirement_ids.push(RequirementId::new(req));
        }
    }

    let edges: Vec<(String, String)> = sqlx::query_as(
        "SELECT control_template_id, policy_template_id FROM control_template_policies
         WHERE control_template_id = ANY($1) ORDER BY control_template_id, policy_template_id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    for (ct, pt) in edges {
        if let Some(rel) = relations.get_mut(&ct) {
            rel.policy_template_ids.push(PolicyTemplateId::new(pt));
        }
    }

    let edges: Vec<(String, String)> = sqlx::query_as(
        "SELECT control_template_id, task_template_id FROM control_template_tasks
         WHERE control_template_id = ANY($1) ORDER BY control_template_id, task_template_id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    for (ct, tt) in edges {
        if let Some(rel) = relations.get_mut(&ct) {
            rel.task_template_ids.push(TaskTemplateId::new(tt));
        }
    }

    Ok(relations.into_values().collect())
}

/// Visible frameworks among `ids`, ids only.
pub async fn visible_framework_ids(
    conn: &mut PgConnection,
    ids: &[FrameworkId],
) -> Result<Vec<FrameworkId>, StoreError> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM frameworks WHERE id = ANY($1) AND visible ORDER BY id",
    )
    .bind(strings(ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    Ok(rows.into_iter().map(FrameworkId::new).collect())
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct FrameworkRow {
    id: String,
    name: String,
    version: String,
    description: String,
    visible: bool,
}

impl FrameworkRow {
    fn into_record(self) -> Framework {
        Framework {
            id: FrameworkId::new(self.id),
            name: self.name,
            version: self.version,
            description: self.description,
            visible: self.visible,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RequirementRow {
    id: String,
    framework_id: String,
    identifier: String,
    name: String,
    description: String,
}

impl RequirementRow {
    fn into_record(self) -> Requirement {
        Requirement {
            id: RequirementId::new(self.id),
            framework_id: FrameworkId::new(self.framework_id),
            identifier: self.identifier,
            name: self.name,
            description: self.description,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ControlTemplateRow {
    id: String,
    name: String,
    description: String,
}

impl ControlTemplateRow {
    fn into_record(self) -> ControlTemplate {
        ControlTemplate {
            id: ControlTemplateId::new(self.id),
            name: self.name,
            description: self.description,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PolicyTemplateRow {
    id: String,
    name: String,
    description: String,
    content: serde_json::Value,
    department: String,
    frequency: Option<String>,
}

impl PolicyTemplateRow {
    fn into_record(self) -> Result<PolicyTemplate, StoreError> {
        Ok(PolicyTemplate {
            id: PolicyTemplateId::new(self.id),
            name: self.name,
            description: self.description,
            content: self.content,
            department: self.department.parse()?,
            frequency: self.frequency.as_deref().map(str::parse).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskTemplateRow {
    id: String,
    name: String,
    description: String,
    department: String,
    frequency: Option<String>,
}

impl TaskTemplateRow {
    fn into_record(self) -> Result<TaskTemplate, StoreError> {
        Ok(TaskTemplate {
            id: TaskTemplateId::new(self.id),
            name: self.name,
            description: self.description,
            department: self.department.parse()?,
            frequency: self.frequency.as_deref().map(str::parse).transpose()?,
        })
    }
}
