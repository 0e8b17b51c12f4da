//! Catalog import.
//!
//! Writes a [`CatalogSeed`] into the template tables and registers its
//! organizations. Rows that already exist by id are left untouched, so an
//! import can be repeated and a later seed can only add to the catalog.

use sqlx::{PgConnection, Postgres, QueryBuilder};

use comply_store::{CatalogSeed, StoreError};

use crate::error::write;

/// Rows written by [`import_catalog`], per table group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub organizations: u64,
    pub frameworks: u64,
    pub requirements: u64,
    pub templates: u64,
    pub relations: u64,
}

/// Import `seed` through `conn`. Run it inside a transaction to make the
/// import all-or-nothing.
pub async fn import_catalog(
    conn: &mut PgConnection,
    seed: &CatalogSeed,
) -> Result<ImportSummary, StoreError> {
    let mut summary = ImportSummary::default();

    if !seed.organizations.is_empty() {
        let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO organizations (id) ");
        qb.push_values(&seed.organizations, |mut b, id| {
            b.push_bind(id.as_str());
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        summary.organizations = execute(conn, qb, "organization").await?;
    }

    let frameworks = seed.frameworks_with_requirements();
    if !frameworks.is_empty() {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO frameworks (id, name, version, description, visible) ",
        );
        qb.push_values(&frameworks, |mut b, fw| {
            let fw = &fw.framework;
            b.push_bind(fw.id.as_str())
                .push_bind(fw.name.as_str())
                .push_bind(fw.version.as_str())
                .push_bind(fw.description.as_str())
                .push_bind(fw.visible);
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        summary.frameworks = execute(conn, qb, "framework").await?;
    }

    let requirements: Vec<_> = frameworks.iter().flat_map(|fw| &fw.requirements).collect();
    if !requirements.is_empty() {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO requirements (id, framework_id, identifier, name, description) ",
        );
        qb.push_values(&requirements, |mut b, req| {
            b.push_bind(req.id.as_str())
                .push_bind(req.framework_id.as_str())
                .push_bind(req.identifier.as_str())
                .push_bind(req.name.as_str())
                .push_bind(req.description.as_str());
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        summary.requirements = execute(conn, qb, "requirement").await?;
    }

    if !seed.control_templates.is_empty() {
        let mut qb =
            QueryBuilder::<Postgres>::new("INSERT INTO control_templates (id, name, description) ");
        qb.push_values(&seed.control_templates, |mut b, ct| {
            b.push_bind(ct.template.id.as_str())
                .push_bind(ct.template.name.as_str())
                .push_bind(ct.template.description.as_str());
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        summary.templates += execute(conn, qb, "control_template").await?;
    }

    if !seed.policy_templates.is_empty() {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO policy_templates (id, name, description, content, department, frequency) ",
        );
        qb.push_values(&seed.policy_templates, |mut b, pt| {
            b.push_bind(pt.id.as_str())
                .push_bind(pt.name.as_str())
                .push_bind(pt.description.as_str())
                .push_bind(&pt.content)
                .push_bind(pt.department.as_str())
                .push_bind(pt.frequency.map(|f| f.as_str()));
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        summary.templates += execute(conn, qb, "policy_template").await?;
    }

    if !seed.task_templates.is_empty() {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO task_templates (id, name, description, department, frequency) ",
        );
        qb.push_values(&seed.task_templates, |mut b, tt| {
            b.push_bind(tt.id.as_str())
                .push_bind(tt.name.as_str())
                .push_bind(tt.description.as_str())
                .push_bind(tt.department.as_str())
                .push_bind(tt.frequency.map(|f| f.as_str()));
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        summary.templates += execute(conn, qb, "task_template").await?;
    }

    let relations = seed.relations();
    let edges = [
        (
            "control_template_requirements",
            "requirement_id",
            relations
                .iter()
                .flat_map(|r| r.requirement_ids.iter().map(move |id| (r, id.as_str())))
                .map(|(r, id)| (r.control_template_id.as_str(), id))
                .collect::<Vec<_>>(),
        ),
        (
            "control_template_policies",
            "policy_template_id",
            relations
                .iter()
                .flat_map(|r| r.policy_template_ids.iter().map(move |id| (r, id.as_str())))
                .map(|(r, id)| (r.control_template_id.as_str(), id))
                .collect(),
        ),
        (
            "control_template_tasks",
            "task_template_id",
            relations
                .iter()
                .flat_map(|r| r.task_template_ids.iter().map(move |id| (r, id.as_str())))
                .map(|(r, id)| (r.control_template_id.as_str(), id))
                .collect(),
        ),
    ];
    for (table, column, pairs) in edges {
        if pairs.is_empty() {
            continue;
        }
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {table} (control_template_id, {column}) "
        ));
        qb.push_values(&pairs, |mut b, (ct, other)| {
            b.push_bind(*ct).push_bind(*other);
        });
        qb.push(" ON CONFLICT DO NOTHING");
        summary.relations += execute(conn, qb, table).await?;
    }

    tracing::info!(
        frameworks = summary.frameworks,
        templates = summary.templates,
        relations = summary.relations,
        "catalog imported"
    );
    Ok(summary)
}

async fn execute(
    conn: &mut PgConnection,
    mut qb: QueryBuilder<'_, Postgres>,
    entity: &'static str,
) -> Result<u64, StoreError> {
    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| write(entity, e))?;
    Ok(done.rows_affected())
}
