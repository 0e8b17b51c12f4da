//! # comply-db — PostgreSQL Persistence
//!
//! sqlx implementation of the repository seams in `comply-store`.
//!
//! ## Architecture
//!
//! - [`PgDatabase`] wraps a [`PgPool`] and hands out [`PgTransaction`]s.
//! - [`PgTransaction`] owns one `sqlx::Transaction` and implements both
//!   repository traits on it, so every read and write of a run goes
//!   through the same database transaction.
//! - [`templates`] and [`instances`] hold the SQL, written against a
//!   plain `&mut PgConnection`.
//! - [`seed`] imports a YAML catalog into the template tables.
//!
//! ## Insert-if-absent
//!
//! Batches are multi-row `INSERT ... ON CONFLICT DO NOTHING` statements,
//! so duplicates are skipped in-statement and `rows_affected` is the
//! number created. Framework instances are inserted one row per savepoint
//! without `ON CONFLICT`; a unique violation rolls back only the savepoint
//! and surfaces as `StoreError::Conflict`.

pub mod backend;
pub mod error;
pub mod instances;
pub mod seed;
pub mod templates;

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

pub use backend::{PgDatabase, PgTransaction};
pub use seed::{import_catalog, ImportSummary};

/// Connection pool options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    /// Defaults for `database_url`.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Connect a pool and run embedded migrations.
pub async fn init_pool(config: &PoolConfig) -> Result<PgPool, sqlx::Error> {
    let pool = connect(config).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Connect a pool without touching the schema.
pub async fn connect(config: &PoolConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

/// Apply embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
