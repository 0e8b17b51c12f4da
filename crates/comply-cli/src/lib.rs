//! # comply-cli — Materialization Command-Line Interface
//!
//! Drives the reconciliation engine from the shell.
//!
//! ## Subcommands
//!
//! - `add-frameworks`: adopt frameworks for one organization
//! - `fix-org`: fill gaps in one organization's existing frameworks
//! - `fix-all`: batch fix-up across every organization
//! - `plan`: dry run that prints the materialization plan
//! - `migrate`: apply the embedded schema migrations
//! - `simulate`: run against a YAML catalog in memory, no database
//!
//! Argument parsing lives in `main.rs`; [`config`] layers settings and
//! [`commands`] holds the handlers, which return JSON reports.

pub mod commands;
pub mod config;
