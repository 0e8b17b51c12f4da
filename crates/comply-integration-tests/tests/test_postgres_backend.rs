//! The engine against PostgreSQL.
//!
//! Requires `DATABASE_URL`; every test returns early without it:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/comply_test cargo test -p comply-integration-tests --test test_postgres_backend
//! ```
//!
//! Each test works in its own freshly created organization, so the suite
//! can share one database and run in parallel.

mod common;

use std::sync::Arc;
use std::time::Duration;

use comply_core::{
    ControlTemplateId, ErrorClass, FrameworkId, FrameworkInstance, MaterializationSummary,
    OrganizationId, RequirementId, RequirementMap,
};
use comply_db::{PgDatabase, PgTransaction, PoolConfig};
use comply_engine::{
    resolve, ExistingState, Materializer, Orchestrator, ReconcileRequest, TemplateCatalog,
};
use comply_store::{Database, InstanceRepository, StoreError, Transaction};
use sqlx::PgPool;
use uuid::Uuid;

use common::reference_seed;

/// Migrated pool with the reference catalog imported, or `None` when no
/// database is configured.
async fn pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };
    let pool = comply_db::init_pool(&PoolConfig::new(url))
        .await
        .expect("connect and migrate");
    let mut conn = pool.acquire().await.expect("acquire connection");
    comply_db::import_catalog(&mut conn, &reference_seed())
        .await
        .expect("import reference catalog");
    Some(pool)
}

async fn fresh_org(pool: &PgPool) -> OrganizationId {
    let id = OrganizationId::new(format!("org_{}", Uuid::new_v4().simple()));
    sqlx::query("INSERT INTO organizations (id, name) VALUES ($1, 'integration test')")
        .bind(id.as_str())
        .execute(pool)
        .await
        .expect("insert organization");
    id
}

fn soc2(org: &OrganizationId) -> ReconcileRequest {
    ReconcileRequest::add_frameworks(org.clone(), [FrameworkId::from("soc2")])
}

/// Row counts for `org`: framework instances, controls, policies, tasks,
/// requirement maps, control-policy links, control-task links.
async fn counts(pool: &PgPool, org: &OrganizationId) -> [i64; 7] {
    const QUERIES: [&str; 7] = [
        "SELECT count(*) FROM framework_instances WHERE organization_id = $1",
        "SELECT count(*) FROM controls WHERE organization_id = $1",
        "SELECT count(*) FROM policies WHERE organization_id = $1",
        "SELECT count(*) FROM tasks WHERE organization_id = $1",
        "SELECT count(*) FROM requirement_maps rm
         JOIN controls c ON c.id = rm.control_id WHERE c.organization_id = $1",
        "SELECT count(*) FROM control_policies cp
         JOIN controls c ON c.id = cp.control_id WHERE c.organization_id = $1",
        "SELECT count(*) FROM control_tasks ct
         JOIN controls c ON c.id = ct.control_id WHERE c.organization_id = $1",
    ];
    let mut out = [0i64; 7];
    for (slot, sql) in out.iter_mut().zip(QUERIES) {
        *slot = sqlx::query_scalar(sql)
            .bind(org.as_str())
            .fetch_one(pool)
            .await
            .expect("count rows");
    }
    out
}

/// Plan and write `frameworks` for `org` inside `tx` without committing.
async fn stage(
    tx: &mut PgTransaction,
    org: &OrganizationId,
    frameworks: &[&str],
) -> Result<MaterializationSummary, StoreError> {
    let ids: Vec<FrameworkId> = frameworks.iter().map(|f| FrameworkId::from(*f)).collect();
    let catalog = TemplateCatalog::load(&mut *tx, &ids)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let existing = ExistingState::load(&mut *tx, org, &catalog).await?;
    let plan = resolve(&catalog, &existing);
    Materializer::default()
        .apply(&mut *tx, org, &catalog, &plan)
        .await
}

#[tokio::test]
async fn first_run_creates_the_graph_and_rerun_creates_nothing() {
    let Some(pool) = pool().await else { return };
    let org = fresh_org(&pool).await;
    let orch = Orchestrator::new(PgDatabase::new(pool.clone()));

    let first = orch.reconcile(soc2(&org)).await.unwrap();
    assert_eq!(
        first,
        MaterializationSummary {
            framework_instances_created: 1,
            controls_created: 3,
            policies_created: 1,
            tasks_created: 1,
            requirement_maps_created: 3,
            policy_links_created: 1,
            task_links_created: 1,
        }
    );
    assert_eq!(counts(&pool, &org).await, [1, 3, 1, 1, 3, 1, 1]);

    let content: serde_json::Value =
        sqlx::query_scalar("SELECT content FROM policies WHERE organization_id = $1")
            .bind(org.as_str())
            .fetch_one(&pool)
            .await
            .unwrap();
    let template = reference_seed()
        .policy_templates
        .into_iter()
        .find(|pt| pt.id.as_str() == "pt_access")
        .unwrap();
    assert_eq!(content, template.content);

    let rerun = orch.reconcile(soc2(&org)).await.unwrap();
    assert!(rerun.is_empty(), "{rerun:?}");
    let fix = orch
        .reconcile(ReconcileRequest::fix_organization(org.clone()))
        .await
        .unwrap();
    assert!(fix.is_empty(), "{fix:?}");
    assert_eq!(counts(&pool, &org).await, [1, 3, 1, 1, 3, 1, 1]);
}

#[tokio::test]
async fn failure_mid_run_rolls_back_every_layer() {
    let Some(pool) = pool().await else { return };
    let org = fresh_org(&pool).await;
    let db = PgDatabase::new(pool.clone());

    let mut tx = db.begin().await.unwrap();
    let staged = stage(&mut tx, &org, &["soc2"]).await.unwrap();
    assert_eq!(staged.controls_created, 3);

    // An edge to a requirement that does not exist violates a foreign key.
    let control = tx
        .controls_for_templates(&org, &[ControlTemplateId::from("ct_access")])
        .await
        .unwrap()
        .remove(0);
    let instance = tx
        .framework_instances(&org, &[FrameworkId::from("soc2")])
        .await
        .unwrap()
        .remove(0);
    let err = tx
        .insert_requirement_maps(&[RequirementMap::new(
            control.id,
            instance.id,
            RequirementId::from("no_such_requirement"),
        )])
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Fatal);
    tx.rollback().await.unwrap();

    assert_eq!(counts(&pool, &org).await, [0; 7]);

    // A transaction dropped without commit leaves nothing either.
    {
        let mut tx = db.begin().await.unwrap();
        stage(&mut tx, &org, &["soc2"]).await.unwrap();
    }
    assert_eq!(counts(&pool, &org).await, [0; 7]);
}

#[tokio::test]
async fn duplicate_framework_instance_keeps_the_transaction_usable() {
    let Some(pool) = pool().await else { return };
    let org = fresh_org(&pool).await;
    let orch = Orchestrator::new(PgDatabase::new(pool.clone()));
    orch.reconcile(soc2(&org)).await.unwrap();

    let mut tx = orch.database().begin().await.unwrap();
    let err = tx
        .insert_framework_instance(&FrameworkInstance::new(org.clone(), FrameworkId::from("soc2")))
        .await
        .unwrap_err();
    assert!(
        matches!(err, StoreError::Conflict { entity: "framework_instance", .. }),
        "{err:?}"
    );

    // Only the savepoint was rolled back.
    let instances = tx
        .framework_instances(&org, &[FrameworkId::from("soc2")])
        .await
        .unwrap();
    assert_eq!(instances.len(), 1);
    tx.commit().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_transactions_for_one_organization_both_commit() {
    let Some(pool) = pool().await else { return };
    let org = fresh_org(&pool).await;
    let db = PgDatabase::new(pool.clone());

    let mut first = db.begin().await.unwrap();
    let first_summary = stage(&mut first, &org, &["soc2"]).await.unwrap();

    // The second run blocks on the first run's uncommitted keys.
    let second = tokio::spawn({
        let db = db.clone();
        let org = org.clone();
        async move {
            let mut tx = db.begin().await?;
            let summary = stage(&mut tx, &org, &["soc2", "iso27001"]).await?;
            tx.commit().await?;
            Ok::<_, StoreError>(summary)
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    first.commit().await.unwrap();
    let second_summary = second.await.unwrap().unwrap();

    assert_eq!(first_summary.controls_created, 3);
    assert_eq!(second_summary.framework_instances_created, 1, "iso27001 only");
    assert_eq!(second_summary.controls_created, 1, "ct_backup only");
    assert_eq!(counts(&pool, &org).await, [2, 4, 1, 1, 5, 1, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orchestrator_runs_all_succeed() {
    let Some(pool) = pool().await else { return };
    let org = fresh_org(&pool).await;
    let orch = Arc::new(Orchestrator::new(PgDatabase::new(pool.clone())));

    let runs: Vec<_> = (0..4)
        .map(|_| {
            let orch = Arc::clone(&orch);
            let request = soc2(&org);
            tokio::spawn(async move { orch.execute(request).await })
        })
        .collect();
    for run in runs {
        let outcome = run.await.unwrap();
        assert!(outcome.success, "{outcome:?}");
    }
    assert_eq!(counts(&pool, &org).await, [1, 3, 1, 1, 3, 1, 1]);
}
