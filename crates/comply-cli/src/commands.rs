//! # Subcommand Handlers
//!
//! Each handler returns a [`Report`]: the JSON document printed on stdout
//! and the process exit code. Handlers that reconcile are generic over the
//! storage backend so the same code path serves Postgres and `simulate`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde::Serialize;

use comply_core::{FrameworkId, OrganizationId, ReconcileOutcome};
use comply_db::PgDatabase;
use comply_engine::{BatchDriver, Orchestrator, ReconcileRequest};
use comply_store::{CatalogSeed, Database, MemoryDatabase};

use crate::config::Settings;

/// Everything went through.
pub const EXIT_OK: u8 = 0;
/// The command failed.
pub const EXIT_FAILURE: u8 = 1;
/// The batch finished but at least one organization failed.
pub const EXIT_BATCH_FAILURES: u8 = 2;

/// A command's JSON output and exit code.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub body: serde_json::Value,
    pub exit_code: u8,
}

impl Report {
    fn new(value: &impl Serialize, exit_code: u8) -> anyhow::Result<Self> {
        Ok(Self {
            body: serde_json::to_value(value).context("serializing command output")?,
            exit_code,
        })
    }

    fn outcome(outcome: &ReconcileOutcome) -> anyhow::Result<Self> {
        let code = if outcome.success {
            EXIT_OK
        } else {
            EXIT_FAILURE
        };
        Self::new(outcome, code)
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Arguments for `import-catalog`.
#[derive(Args, Debug)]
pub struct ImportCatalogArgs {
    /// YAML catalog seed to write into the template tables.
    #[arg(long)]
    pub catalog: PathBuf,
}

/// Arguments for `add-frameworks`.
#[derive(Args, Debug)]
pub struct AddFrameworksArgs {
    /// Organization to materialize into.
    #[arg(long)]
    pub org: String,

    /// Framework to add. Repeat for several.
    #[arg(long = "framework", required = true)]
    pub frameworks: Vec<String>,
}

/// Arguments for `fix-org`.
#[derive(Args, Debug)]
pub struct FixOrgArgs {
    /// Organization to repair.
    #[arg(long)]
    pub org: String,
}

/// Arguments for `fix-all`.
#[derive(Args, Debug)]
pub struct FixAllArgs {
    /// Organizations reconciled concurrently.
    #[arg(long)]
    pub batch_size: Option<usize>,
}

/// Arguments for `plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[arg(long)]
    pub org: String,

    /// Frameworks to plan for. Without any, plans a fix-up of the
    /// organization's existing frameworks.
    #[arg(long = "framework")]
    pub frameworks: Vec<String>,
}

/// Arguments for `simulate`.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// YAML catalog seed loaded into the in-memory backend.
    #[arg(long)]
    pub catalog: PathBuf,

    #[arg(long)]
    pub org: String,

    #[arg(long = "framework", required = true)]
    pub frameworks: Vec<String>,

    /// How many times to run the same request.
    #[arg(long, default_value_t = 1)]
    pub runs: u32,
}

fn add_request(org: &str, frameworks: &[String]) -> ReconcileRequest {
    ReconcileRequest::add_frameworks(
        OrganizationId::from(org),
        frameworks.iter().map(|id| FrameworkId::from(id.as_str())),
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Build an orchestrator over `db` using the configured chunk size.
pub fn orchestrator<D: Database>(db: D, settings: &Settings) -> Orchestrator<D> {
    Orchestrator::new(db).with_insert_chunk_size(settings.insert_chunk_size)
}

/// Connect to Postgres and apply pending migrations.
pub async fn connect(settings: &Settings) -> anyhow::Result<PgDatabase> {
    let pool = comply_db::init_pool(&settings.pool_config()?)
        .await
        .context("initialising database pool")?;
    Ok(PgDatabase::new(pool))
}

/// `add-frameworks`
pub async fn run_add_frameworks<D: Database>(
    orchestrator: &Orchestrator<D>,
    args: &AddFrameworksArgs,
) -> anyhow::Result<Report> {
    let outcome = orchestrator
        .execute(add_request(&args.org, &args.frameworks))
        .await;
    Report::outcome(&outcome)
}

/// `fix-org`
pub async fn run_fix_org<D: Database>(
    orchestrator: &Orchestrator<D>,
    args: &FixOrgArgs,
) -> anyhow::Result<Report> {
    let request = ReconcileRequest::fix_organization(OrganizationId::from(args.org.as_str()));
    let outcome = orchestrator.execute(request).await;
    Report::outcome(&outcome)
}

/// `fix-all`
pub async fn run_fix_all<D: Database>(
    orchestrator: Arc<Orchestrator<D>>,
    batch_size: usize,
) -> anyhow::Result<Report> {
    let report = BatchDriver::new(orchestrator, batch_size)
        .run_all()
        .await
        .context("listing organizations")?;
    let code = if report.has_failures() {
        EXIT_BATCH_FAILURES
    } else {
        EXIT_OK
    };
    Report::new(&report, code)
}

/// `plan`: dry run, nothing is written.
pub async fn run_plan<D: Database>(
    orchestrator: &Orchestrator<D>,
    args: &PlanArgs,
) -> anyhow::Result<Report> {
    let request = if args.frameworks.is_empty() {
        ReconcileRequest::fix_organization(OrganizationId::from(args.org.as_str()))
    } else {
        add_request(&args.org, &args.frameworks)
    };
    match orchestrator.plan(&request).await {
        Ok(plan) => Report::new(&plan, EXIT_OK),
        Err(e) => Report::outcome(&ReconcileOutcome::failed(e.to_string())),
    }
}

/// `migrate`
pub async fn run_migrate(settings: &Settings) -> anyhow::Result<Report> {
    let pool = comply_db::connect(&settings.pool_config()?)
        .await
        .context("connecting to database")?;
    comply_db::migrate(&pool)
        .await
        .context("applying migrations")?;
    Report::new(&serde_json::json!({ "migrated": true }), EXIT_OK)
}

fn read_seed(path: &Path) -> anyhow::Result<CatalogSeed> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    CatalogSeed::from_yaml_str(&text).with_context(|| format!("loading catalog {}", path.display()))
}

/// `import-catalog`: write a catalog seed into PostgreSQL in one transaction.
pub async fn run_import_catalog(
    args: &ImportCatalogArgs,
    settings: &Settings,
) -> anyhow::Result<Report> {
    let seed = read_seed(&args.catalog)?;
    let pool = comply_db::connect(&settings.pool_config()?)
        .await
        .context("connecting to database")?;
    let mut tx = pool.begin().await.context("opening transaction")?;
    let imported = comply_db::import_catalog(&mut tx, &seed)
        .await
        .context("importing catalog")?;
    tx.commit().await.context("committing catalog import")?;
    Report::new(
        &serde_json::json!({
            "organizations": imported.organizations,
            "frameworks": imported.frameworks,
            "requirements": imported.requirements,
            "templates": imported.templates,
            "relations": imported.relations,
        }),
        EXIT_OK,
    )
}

/// `simulate`: run against a catalog fixture in memory.
pub async fn run_simulate(args: &SimulateArgs, settings: &Settings) -> anyhow::Result<Report> {
    let seed = read_seed(&args.catalog)?;

    let db = MemoryDatabase::from_seed(&seed);
    db.add_organization(OrganizationId::from(args.org.as_str()));
    let orchestrator = orchestrator(db, settings);

    let mut outcomes = Vec::with_capacity(args.runs as usize);
    for run in 1..=args.runs {
        let outcome = orchestrator
            .execute(add_request(&args.org, &args.frameworks))
            .await;
        tracing::info!(run, success = outcome.success, "simulated run finished");
        outcomes.push(outcome);
    }

    let code = if outcomes.iter().all(|o| o.success) {
        EXIT_OK
    } else {
        EXIT_FAILURE
    };
    Report::new(&outcomes, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"
organizations: [org_1, org_2]
frameworks:
  - id: soc2
    name: SOC 2
    version: "2017"
    requirements:
      - { id: cc6_1, identifier: CC6.1 }
      - { id: cc6_2, identifier: CC6.2 }
control_templates:
  - id: ct_access
    name: Access Control
    requirements: [cc6_1, cc6_2]
    policies: [pt_access]
    tasks: [tt_review]
policy_templates:
  - { id: pt_access, name: Access Policy, department: it }
task_templates:
  - { id: tt_review, name: Access review, frequency: quarterly }
"#;

    fn memory_orchestrator() -> Orchestrator<MemoryDatabase> {
        let seed = CatalogSeed::from_yaml_str(CATALOG).unwrap();
        orchestrator(MemoryDatabase::from_seed(&seed), &Settings::default())
    }

    fn add_args(org: &str, frameworks: &[&str]) -> AddFrameworksArgs {
        AddFrameworksArgs {
            org: org.into(),
            frameworks: frameworks.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn add_frameworks_reports_counts() {
        let orch = memory_orchestrator();
        let report = run_add_frameworks(&orch, &add_args("org_1", &["soc2"]))
            .await
            .unwrap();
        assert_eq!(report.exit_code, EXIT_OK);
        assert_eq!(report.body["success"], true);
        assert_eq!(report.body["frameworkInstancesCreated"], 1);
        assert_eq!(report.body["controlsCreated"], 1);
        assert_eq!(report.body["requirementMapsCreated"], 2);
    }

    #[tokio::test]
    async fn failed_run_exits_one_with_error_text() {
        let orch = memory_orchestrator();
        let report = run_add_frameworks(&orch, &add_args("org_1", &["hipaa"]))
            .await
            .unwrap();
        assert_eq!(report.exit_code, EXIT_FAILURE);
        assert_eq!(report.body["success"], false);
        assert!(report.body["error"].is_string());
    }

    #[tokio::test]
    async fn plan_writes_nothing() {
        let orch = memory_orchestrator();
        let args = PlanArgs {
            org: "org_1".into(),
            frameworks: vec!["soc2".into()],
        };
        let report = run_plan(&orch, &args).await.unwrap();
        assert_eq!(report.exit_code, EXIT_OK);
        assert_eq!(
            report.body["controlsToCreate"].as_array().unwrap().len(),
            1
        );
        assert!(orch.database().snapshot().is_empty());
    }

    #[tokio::test]
    async fn plan_without_frameworks_needs_existing_instances() {
        let orch = memory_orchestrator();
        let args = PlanArgs {
            org: "org_1".into(),
            frameworks: Vec::new(),
        };
        let report = run_plan(&orch, &args).await.unwrap();
        assert_eq!(report.exit_code, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn fix_all_skips_empty_organizations() {
        let orch = Arc::new(memory_orchestrator());
        run_add_frameworks(orch.as_ref(), &add_args("org_1", &["soc2"]))
            .await
            .unwrap();

        let report = run_fix_all(orch, 5).await.unwrap();
        assert_eq!(report.exit_code, EXIT_OK);
        assert_eq!(report.body["totalProcessed"], 2);
        assert_eq!(report.body["succeeded"], 1);
        assert_eq!(report.body["skipped"], 1);
    }

    #[tokio::test]
    async fn fix_org_after_add_is_a_no_op() {
        let orch = memory_orchestrator();
        run_add_frameworks(&orch, &add_args("org_2", &["soc2"]))
            .await
            .unwrap();
        let report = run_fix_org(&orch, &FixOrgArgs { org: "org_2".into() })
            .await
            .unwrap();
        assert_eq!(report.exit_code, EXIT_OK);
        assert_eq!(report.body["controlsCreated"], 0);
    }

    #[tokio::test]
    async fn simulate_second_run_creates_nothing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let args = SimulateArgs {
            catalog: file.path().to_path_buf(),
            org: "org_new".into(),
            frameworks: vec!["soc2".into()],
            runs: 2,
        };

        let report = run_simulate(&args, &Settings::default()).await.unwrap();
        assert_eq!(report.exit_code, EXIT_OK);
        let runs = report.body.as_array().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0]["policiesCreated"], 1);
        assert_eq!(runs[1]["policiesCreated"], 0);
        assert_eq!(runs[1]["requirementMapsCreated"], 0);
    }

    #[tokio::test]
    async fn simulate_rejects_a_broken_catalog() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"control_templates:\n  - { id: ct, name: X, requirements: [nope] }\n")
            .unwrap();
        let args = SimulateArgs {
            catalog: file.path().to_path_buf(),
            org: "org_1".into(),
            frameworks: vec!["soc2".into()],
            runs: 1,
        };
        assert!(run_simulate(&args, &Settings::default()).await.is_err());
    }
}
