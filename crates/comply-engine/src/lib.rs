//! # comply-engine — Template-to-Instance Materialization
//!
//! Turns the shared template catalog into organization-scoped instance
//! graphs, adding only what is missing.
//!
//! ## Pipeline
//!
//! ```text
//! ReconcileRequest
//!   └─▶ Orchestrator::prepare        (Planning, no transaction)
//!         └─▶ Database::begin        (Applying)
//!               ├─▶ TemplateCatalog::load
//!               ├─▶ ExistingState::load ─▶ diff::resolve ─▶ MaterializationPlan
//!               └─▶ Materializer::apply
//!         └─▶ Transaction::commit    (Committed) ─▶ AuditSink, CacheInvalidator
//! ```
//!
//! [`BatchDriver`] runs the same pipeline for every organization with
//! per-organization failure isolation.
//!
//! ## Modules
//!
//! - [`catalog`]: typed catalog snapshot with adjacency lists.
//! - [`diff`]: existing-state load and the pure diff.
//! - [`materialize`]: layered, chunked writes.
//! - [`run`]: the run lifecycle state machine.
//! - [`orchestrator`]: request validation and the transaction boundary.
//! - [`batch`]: fan-out over organizations.
//! - [`events`]: audit and cache-invalidation collaborators.
//! - [`telemetry`]: `metrics` counters.

pub mod batch;
pub mod catalog;
pub mod diff;
pub mod error;
pub mod events;
pub mod materialize;
pub mod orchestrator;
pub mod run;
pub mod telemetry;

pub use batch::{BatchDriver, BatchReport, OrganizationFailure, DEFAULT_BATCH_SIZE};
pub use catalog::{CatalogError, TemplateCatalog};
pub use diff::{
    resolve, ExistingState, MaterializationPlan, PlannedEdge, PlannedPolicyLink, PlannedTaskLink,
};
pub use error::MaterializeError;
pub use events::{
    AuditSink, CacheInvalidator, CacheScope, MaterializationEvent, TracingAuditSink,
    TracingCacheInvalidator,
};
pub use materialize::{Materializer, DEFAULT_INSERT_CHUNK_SIZE};
pub use orchestrator::{Orchestrator, ReconcileMode, ReconcileRequest};
pub use run::{PhaseTransition, Run, RunError, RunPhase};
