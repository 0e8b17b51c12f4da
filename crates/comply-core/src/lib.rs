//! # comply-core — Foundational Types for Compliance Materialization
//!
//! Leaf crate of the workspace. Defines the vocabulary every other crate
//! speaks: identifier newtypes, template catalog records, organization
//! instance records, run summaries, and the error taxonomy.
//!
//! ## Key Design Principles
//!
//! 1. **Separate identifier namespaces.** Template ids (`ControlTemplateId`)
//!    and instance ids (`ControlId`) are distinct newtypes. Dedup keys of the
//!    instance graph are always `(OrganizationId, <TemplateId>)`.
//!
//! 2. **Records, not behaviour.** Nothing here touches storage. Repository
//!    seams live in `comply-store`; the engine lives in `comply-engine`.
//!
//! 3. **Four error classes.** `ErrorClass` is the only thing callers need to
//!    branch on to decide between surfacing, skipping, and aborting.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `comply-*` crates.
//! - No `unsafe` code.
//! - No `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod instance;
pub mod summary;
pub mod template;

pub use error::{ErrorClass, ParseError};
pub use identity::{
    ControlId, ControlTemplateId, FrameworkId, FrameworkInstanceId, OrganizationId, PolicyId,
    PolicyTemplateId, RequirementId, RequirementMapId, TaskId, TaskTemplateId,
};
pub use instance::{
    Control, ControlPolicyLink, ControlTaskLink, FrameworkInstance, Policy, PolicyStatus,
    RequirementMap, Task, TaskStatus,
};
pub use summary::{MaterializationSummary, ReconcileOutcome};
pub use template::{
    ControlTemplate, ControlTemplateRelations, Department, Framework, FrameworkWithRequirements,
    Frequency, PolicyTemplate, Requirement, TaskTemplate,
};
