//! Instance graph queries and insert-if-absent writes.
//!
//! Multi-row inserts are built with [`QueryBuilder::push_values`] and end in
//! `ON CONFLICT (<natural key>) DO NOTHING`; the difference between rows
//! attempted and `rows_affected` is reported as skipped. Callers chunk
//! their batches so a statement stays well under the bind-parameter limit.

use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};

use comply_core::{
    Control, ControlId, ControlPolicyLink, ControlTaskLink, ControlTemplateId, FrameworkId,
    FrameworkInstance, FrameworkInstanceId, OrganizationId, Policy, PolicyId, PolicyTemplateId,
    RequirementId, RequirementMap, RequirementMapId, Task, TaskId, TaskTemplateId,
};
use comply_store::{InsertOutcome, StoreError};

use crate::error::{backend, write};
use crate::templates::strings;

fn outcome(attempted: usize, affected: u64) -> InsertOutcome {
    InsertOutcome {
        inserted: affected,
        skipped: (attempted as u64).saturating_sub(affected),
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Whether the organization row exists.
pub async fn organization_exists(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
) -> Result<bool, StoreError> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM organizations WHERE id = $1)")
        .bind(organization_id.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(backend)
}

/// Every organization id, ordered.
pub async fn organization_ids(conn: &mut PgConnection) -> Result<Vec<OrganizationId>, StoreError> {
    let rows: Vec<String> = sqlx::query_scalar("SELECT id FROM organizations ORDER BY id")
        .fetch_all(&mut *conn)
        .await
        .map_err(backend)?;
    Ok(rows.into_iter().map(OrganizationId::new).collect())
}

/// Catalog frameworks the organization has instantiated.
pub async fn instantiated_framework_ids(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
) -> Result<Vec<FrameworkId>, StoreError> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT framework_id FROM framework_instances WHERE organization_id = $1 ORDER BY framework_id",
    )
    .bind(organization_id.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(rows.into_iter().map(FrameworkId::new).collect())
}

/// Framework instances of the organization for `framework_ids`.
pub async fn framework_instances(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
    framework_ids: &[FrameworkId],
) -> Result<Vec<FrameworkInstance>, StoreError> {
    let rows = sqlx::query_as::<_, FrameworkInstanceRow>(
        "SELECT id, organization_id, framework_id, created_at
         FROM framework_instances
         WHERE organization_id = $1 AND framework_id = ANY($2)",
    )
    .bind(organization_id.as_str())
    .bind(strings(framework_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(rows.into_iter().map(FrameworkInstanceRow::into_record).collect())
}

/// Controls of the organization materialized from `template_ids`.
pub async fn controls_for_templates(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
    template_ids: &[ControlTemplateId],
) -> Result<Vec<Control>, StoreError> {
    let rows = sqlx::query_as::<_, ControlRow>(
        "SELECT id, organization_id, name, description, control_template_id, created_at
         FROM controls
         WHERE organization_id = $1 AND control_template_id = ANY($2)",
    )
    .bind(organization_id.as_str())
    .bind(strings(template_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(rows.into_iter().map(ControlRow::into_record).collect())
}

/// Policies of the organization materialized from `template_ids`.
pub async fn policies_for_templates(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
    template_ids: &[PolicyTemplateId],
) -> Result<Vec<Policy>, StoreError> {
    let rows = sqlx::query_as::<_, PolicyRow>(
        "SELECT id, organization_id, name, description, content, department, frequency,
                status, policy_template_id, created_at
         FROM policies
         WHERE organization_id = $1 AND policy_template_id = ANY($2)",
    )
    .bind(organization_id.as_str())
    .bind(strings(template_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    rows.into_iter().map(PolicyRow::into_record).collect()
}

/// Tasks of the organization materialized from `template_ids`.
pub async fn tasks_for_templates(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
    template_ids: &[TaskTemplateId],
) -> Result<Vec<Task>, StoreError> {
    let rows = sqlx::query_as::<_, TaskRow>(
        "SELECT id, organization_id, title, description, department, frequency,
                status, task_template_id, entity_id, created_at
         FROM tasks
         WHERE organization_id = $1 AND task_template_id = ANY($2)",
    )
    .bind(organization_id.as_str())
    .bind(strings(template_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    rows.into_iter().map(TaskRow::into_record).collect()
}

/// Requirement-map edges of `control_ids`.
pub async fn requirement_maps_for_controls(
    conn: &mut PgConnection,
    control_ids: &[ControlId],
) -> Result<Vec<RequirementMap>, StoreError> {
    let rows: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT id, control_id, framework_instance_id, requirement_id
         FROM requirement_maps WHERE control_id = ANY($1)",
    )
    .bind(strings(control_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(rows
        .into_iter()
        .map(|(id, control, fi, req)| RequirementMap {
            id: RequirementMapId::new(id),
            control_id: ControlId::new(control),
            framework_instance_id: FrameworkInstanceId::new(fi),
            requirement_id: RequirementId::new(req),
        })
        .collect())
}

/// Control→policy connections of `control_ids`.
pub async fn policy_links_for_controls(
    conn: &mut PgConnection,
    control_ids: &[ControlId],
) -> Result<Vec<ControlPolicyLink>, StoreError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT control_id, policy_id FROM control_policies WHERE control_id = ANY($1)",
    )
    .bind(strings(control_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(rows
        .into_iter()
        .map(|(control, policy)| ControlPolicyLink {
            control_id: ControlId::new(control),
            policy_id: PolicyId::new(policy),
        })
        .collect())
}

/// Control→task connections of `control_ids`.
pub async fn task_links_for_controls(
    conn: &mut PgConnection,
    control_ids: &[ControlId],
) -> Result<Vec<ControlTaskLink>, StoreError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT control_id, task_id FROM control_tasks WHERE control_id = ANY($1)",
    )
    .bind(strings(control_ids))
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(rows
        .into_iter()
        .map(|(control, task)| ControlTaskLink {
            control_id: ControlId::new(control),
            task_id: TaskId::new(task),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Insert one framework instance inside a savepoint.
///
/// A unique violation rolls back the savepoint only and is returned as
/// [`StoreError::Conflict`]; the enclosing transaction stays usable.
pub async fn insert_framework_instance(
    conn: &mut PgConnection,
    row: &FrameworkInstance,
) -> Result<InsertOutcome, StoreError> {
    let mut savepoint = conn.begin().await.map_err(backend)?;
    let result = sqlx::query(
        "INSERT INTO framework_instances (id, organization_id, framework_id, created_at)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(row.id.as_str())
    .bind(row.organization_id.as_str())
    .bind(row.framework_id.as_str())
    .bind(row.created_at)
    .execute(&mut *savepoint)
    .await;

    match result {
        Ok(done) => {
            savepoint.commit().await.map_err(backend)?;
            Ok(outcome(1, done.rows_affected()))
        }
        Err(e) => {
            savepoint.rollback().await.map_err(backend)?;
            Err(write("framework_instance", e))
        }
    }
}

/// Insert controls, skipping existing `(organization_id, control_template_id)`.
pub async fn insert_controls(
    conn: &mut PgConnection,
    rows: &[Control],
) -> Result<InsertOutcome, StoreError> {
    if rows.is_empty() {
        return Ok(InsertOutcome::default());
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO controls (id, organization_id, name, description, control_template_id, created_at) ",
    );
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.id.as_str())
            .push_bind(row.organization_id.as_str())
            .push_bind(row.name.as_str())
            .push_bind(row.description.as_str())
            .push_bind(row.control_template_id.as_ref().map(|id| id.as_str()))
            .push_bind(row.created_at);
    });
    qb.push(" ON CONFLICT (organization_id, control_template_id) DO NOTHING");

    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| write("control", e))?;
    Ok(outcome(rows.len(), done.rows_affected()))
}

/// Insert policies, skipping existing `(organization_id, policy_template_id)`.
pub async fn insert_policies(
    conn: &mut PgConnection,
    rows: &[Policy],
) -> Result<InsertOutcome, StoreError> {
    if rows.is_empty() {
        return Ok(InsertOutcome::default());
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO policies (id, organization_id, name, description, content, department, \
         frequency, status, policy_template_id, created_at) ",
    );
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.id.as_str())
            .push_bind(row.organization_id.as_str())
            .push_bind(row.name.as_str())
            .push_bind(row.description.as_str())
            .push_bind(&row.content)
            .push_bind(row.department.as_str())
            .push_bind(row.frequency.map(|f| f.as_str()))
            .push_bind(row.status.as_str())
            .push_bind(row.policy_template_id.as_ref().map(|id| id.as_str()))
            .push_bind(row.created_at);
    });
    qb.push(" ON CONFLICT (organization_id, policy_template_id) DO NOTHING");

    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| write("policy", e))?;
    Ok(outcome(rows.len(), done.rows_affected()))
}

/// Insert tasks, skipping existing `(organization_id, task_template_id)`.
pub async fn insert_tasks(
    conn: &mut PgConnection,
    rows: &[Task],
) -> Result<InsertOutcome, StoreError> {
    if rows.is_empty() {
        return Ok(InsertOutcome::default());
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO tasks (id, organization_id, title, description, department, frequency, \
         status, task_template_id, entity_id, created_at) ",
    );
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.id.as_str())
            .push_bind(row.organization_id.as_str())
            .push_bind(row.title.as_str())
            .push_bind(row.description.as_str())
            .push_bind(row.department.as_str())
            .push_bind(row.frequency.map(|f| f.as_str()))
            .push_bind(row.status.as_str())
            .push_bind(row.task_template_id.as_ref().map(|id| id.as_str()))
            .push_bind(row.entity_id.as_ref().map(|id| id.as_str()))
            .push_bind(row.created_at);
    });
    qb.push(" ON CONFLICT (organization_id, task_template_id) DO NOTHING");

    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| write("task", e))?;
    Ok(outcome(rows.len(), done.rows_affected()))
}

/// Insert requirement-map edges, skipping duplicate triples.
pub async fn insert_requirement_maps(
    conn: &mut PgConnection,
    rows: &[RequirementMap],
) -> Result<InsertOutcome, StoreError> {
    if rows.is_empty() {
        return Ok(InsertOutcome::default());
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO requirement_maps (id, control_id, framework_instance_id, requirement_id) ",
    );
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.id.as_str())
            .push_bind(row.control_id.as_str())
            .push_bind(row.framework_instance_id.as_str())
            .push_bind(row.requirement_id.as_str());
    });
    qb.push(" ON CONFLICT (control_id, framework_instance_id, requirement_id) DO NOTHING");

    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| write("requirement_map", e))?;
    Ok(outcome(rows.len(), done.rows_affected()))
}

/// Connect controls to policies, skipping existing pairs.
pub async fn connect_policies(
    conn: &mut PgConnection,
    links: &[ControlPolicyLink],
) -> Result<InsertOutcome, StoreError> {
    if links.is_empty() {
        return Ok(InsertOutcome::default());
    }
    let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO control_policies (control_id, policy_id) ");
    qb.push_values(links, |mut b, link| {
        b.push_bind(link.control_id.as_str())
            .push_bind(link.policy_id.as_str());
    });
    qb.push(" ON CONFLICT DO NOTHING");

    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| write("control_policy", e))?;
    Ok(outcome(links.len(), done.rows_affected()))
}

/// Connect controls to tasks, skipping existing pairs.
pub async fn connect_tasks(
    conn: &mut PgConnection,
    links: &[ControlTaskLink],
) -> Result<InsertOutcome, StoreError> {
    if links.is_empty() {
        return Ok(InsertOutcome::default());
    }
    let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO control_tasks (control_id, task_id) ");
    qb.push_values(links, |mut b, link| {
        b.push_bind(link.control_id.as_str())
            .push_bind(link.task_id.as_str());
    });
    qb.push(" ON CONFLICT DO NOTHING");

    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| write("control_task", e))?;
    Ok(outcome(links.len(), done.rows_affected()))
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct FrameworkInstanceRow {
    id: String,
    organization_id: String,
    framework_id: String,
    created_at: DateTime<Utc>,
}

impl FrameworkInstanceRow {
    fn into_record(self) -> FrameworkInstance {
        FrameworkInstance {
            id: FrameworkInstanceId::new(self.id),
            organization_id: OrganizationId::new(self.organization_id),
            framework_id: FrameworkId::new(self.framework_id),
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ControlRow {
    id: String,
    organization_id: String,
    name: String,
    description: String,
    control_template_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl ControlRow {
    fn into_record(self) -> Control {
        Control {
            id: ControlId::new(self.id),
            organization_id: OrganizationId::new(self.organization_id),
            name: self.name,
            description: self.description,
            control_template_id: self.control_template_id.map(ControlTemplateId::new),
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: String,
    organization_id: String,
    name: String,
    description: String,
    content: serde_json::Value,
    department: String,
    frequency: Option<String>,
    status: String,
    policy_template_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl PolicyRow {
    fn into_record(self) -> Result<Policy, StoreError> {
        Ok(Policy {
            id: PolicyId::new(self.id),
            organization_id: OrganizationId::new(self.organization_id),
            name: self.name,
            description: self.description,
            content: self.content,
            department: self.department.parse()?,
            frequency: self.frequency.as_deref().map(str::parse).transpose()?,
            status: self.status.parse()?,
            policy_template_id: self.policy_template_id.map(PolicyTemplateId::new),
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    organization_id: String,
    title: String,
    description: String,
    department: String,
    frequency: Option<String>,
    status: String,
    task_template_id: Option<String>,
    entity_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_record(self) -> Result<Task, StoreError> {
        Ok(Task {
            id: TaskId::new(self.id),
            organization_id: OrganizationId::new(self.organization_id),
            title: self.title,
            description: self.description,
            department: self.department.parse()?,
            frequency: self.frequency.as_deref().map(str::parse).transpose()?,
            status: self.status.parse()?,
            task_template_id: self.task_template_id.map(TaskTemplateId::new),
            entity_id: self.entity_id.map(ControlId::new),
            created_at: self.created_at,
        })
    }
}
