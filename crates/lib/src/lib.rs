//! zbuild-lib: dependency-ordered package builds.
//!
//! This crate provides the engine behind the `zb` command:
//! - `model`: package identities, dependencies and artifacts
//! - `buildfile`: `build.yaml` parsing and workspace discovery
//! - `graph`: the package dependency graph
//! - `plan`: grouping packages into dependency-ordered build groups
//! - `execute`: running a plan against a build step and an artifact store
//! - `store`: the artifact store contract and its backends

pub mod buildfile;
pub mod config;
pub mod consts;
pub mod execute;
pub mod graph;
pub mod model;
pub mod paths;
pub mod plan;
pub mod store;
pub mod util;

/// Boxed error used at injection points (lookups, build steps).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
