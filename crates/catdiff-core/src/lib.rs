//! catdiff core - catalog model, structural differ and run state
//!
//! This crate provides the data half of the catalog differ:
//! - `Catalog` / `Resource`: the in-memory model of one compiled catalog
//! - `CatalogDiff` / `ResourceDiff`: the structural diff between two catalogs
//! - `HostOutcome` / `HostResult` / `StatesCollection`: per-host verdicts and
//!   their aggregation over one run

pub mod catalog;
pub mod diff;
pub mod error;
pub mod state;

pub use catalog::{Catalog, Content, Resource};
pub use diff::{CatalogDiff, ResourceDiff};
pub use error::CoreError;
pub use state::{HostOutcome, HostResult, RunContext, StatesCollection};
