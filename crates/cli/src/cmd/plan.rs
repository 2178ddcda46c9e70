//! Implementation of the `zb plan` command.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use zbuild_lib::model::PackageId;

use super::{discover, plan_for};
use crate::output::{Mark, OutputFormat, announce, print_json};

#[derive(Serialize)]
struct PlanJson {
  groups: Vec<Vec<PackageId>>,
  packages: usize,
}

pub fn cmd_plan(root: &Path, package: Option<&str>, format: OutputFormat) -> Result<()> {
  let workspace = discover(root)?;
  let plan = plan_for(&workspace, package)?;

  if format.is_json() {
    return print_json(&PlanJson {
      groups: plan.groups().iter().map(|group| group.ids()).collect(),
      packages: plan.package_count(),
    });
  }

  if plan.is_empty() {
    announce(Mark::Note, "Nothing to build");
    return Ok(());
  }

  println!("Plan: {} package(s) in {} group(s)", plan.package_count(), plan.len());
  for (index, group) in plan.groups().iter().enumerate() {
    println!();
    println!("Group {}:", index + 1);
    for package in group.packages() {
      println!("  {} ({})", package, package.package_type);
    }
  }

  Ok(())
}
