//! # comply-store — Repository Seams
//!
//! Everything the materialization engine knows about storage goes through
//! this crate:
//!
//! - [`repository`]: the [`TemplateRepository`], [`InstanceRepository`],
//!   [`Transaction`], and [`Database`] traits, plus [`InsertOutcome`] and
//!   the [`InsertIfAbsent`] adapter that turns duplicate-key races into
//!   skips.
//! - [`memory`]: an in-memory backend with read-committed transactions
//!   and deterministic fault injection.
//! - [`seed`]: the YAML catalog snapshot format used to populate the
//!   in-memory backend.
//!
//! The PostgreSQL backend lives in `comply-db`.

pub mod error;
pub mod memory;
pub mod repository;
pub mod seed;

pub use error::StoreError;
pub use memory::{FailPoint, InstanceGraph, MemoryDatabase, MemoryTransaction};
pub use repository::{
    Database, InsertIfAbsent, InsertOutcome, InstanceRepository, TemplateRepository, Transaction,
};
pub use seed::{CatalogSeed, SeedError};
