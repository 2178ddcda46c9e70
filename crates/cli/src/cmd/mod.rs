mod build;
mod fetch;
mod plan;
mod setup;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use zbuild_lib::buildfile::Workspace;
use zbuild_lib::config::WorkspaceConfig;
use zbuild_lib::graph::DependencyGraph;
use zbuild_lib::model::{Package, PackageId};
use zbuild_lib::paths;
use zbuild_lib::plan::{BuildPlan, resolve};

pub use build::{BuildArgs, cmd_build};
pub use fetch::{FetchArgs, cmd_fetch};
pub use plan::cmd_plan;
pub use setup::cmd_setup;

fn load_config(root: &Path) -> Result<WorkspaceConfig> {
  WorkspaceConfig::load(root).with_context(|| format!("Failed to load config in {}", root.display()))
}

fn discover(root: &Path) -> Result<Workspace> {
  Workspace::discover(root).with_context(|| format!("Failed to discover packages in {}", root.display()))
}

/// The package named on the command line, or every package in the workspace.
fn select_roots(workspace: &Workspace, package: Option<&str>) -> Result<Vec<Package>> {
  match package {
    Some(reference) => {
      let id: PackageId = reference
        .parse()
        .with_context(|| format!("Invalid package reference: {}", reference))?;
      match workspace.get(&id) {
        Some(parsed) => Ok(vec![parsed.package().clone()]),
        None => bail!("Package {} is not declared in {}", id, workspace.root().display()),
      }
    }
    None => Ok(workspace.packages().cloned().collect()),
  }
}

fn plan_for(workspace: &Workspace, package: Option<&str>) -> Result<BuildPlan> {
  let roots = select_roots(workspace, package)?;
  let graph = DependencyGraph::build_all(roots, workspace).context("Failed to build dependency graph")?;
  resolve(&graph).context("Failed to resolve build order")
}

fn store_root(flag: Option<PathBuf>, config: &WorkspaceConfig) -> Result<PathBuf> {
  paths::store_dir(flag.as_deref(), config.store.path.as_deref()).context("Failed to determine artifact store location")
}
