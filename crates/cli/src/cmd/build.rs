//! Implementation of the `zb build` command.
//!
//! Discovers the workspace, resolves the build order and runs one shell
//! command per package type (from `zbuild.toml`), storing each package's
//! `build/` directory as an artifact. Ctrl-C stops the run before the next
//! group starts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zbuild_lib::execute::{
  BuildReport, BuildStatus, BuildStepRegistry, CommandBuildStep, ExecuteConfig, ReportSummary, execute_with_cancel,
  generate_build_number,
};
use zbuild_lib::store::{ArtifactStore, LocalStore};

use super::{discover, load_config, plan_for, store_root};
use crate::output::{Mark, OutputFormat, announce, format_duration, print_field, print_json, print_status};

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Only build this package and its dependencies (namespace/name-version)
  #[arg(short, long)]
  pub package: Option<String>,

  /// Maximum number of concurrent builds within a group
  #[arg(short, long)]
  pub jobs: Option<usize>,

  /// Build number for every artifact of this run (default: UTC timestamp)
  #[arg(long)]
  pub build_number: Option<String>,

  /// Artifact store directory
  #[arg(long)]
  pub store: Option<PathBuf>,
}

#[derive(Serialize)]
struct ReportEntry {
  package: String,
  status: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  detail: Option<String>,
}

#[derive(Serialize)]
struct ReportJson {
  build_number: String,
  success: bool,
  summary: ReportSummary,
  packages: Vec<ReportEntry>,
}

/// Returns whether every package succeeded.
pub fn cmd_build(root: &Path, args: BuildArgs, format: OutputFormat) -> Result<bool> {
  let config = load_config(root)?;
  let workspace = discover(root)?;
  let plan = plan_for(&workspace, args.package.as_deref())?;

  let workdirs = workspace.workdirs();
  let mut steps = BuildStepRegistry::new();
  for (package_type, type_config) in &config.types {
    let step = CommandBuildStep::new(type_config.command.clone(), workdirs.clone()).with_shell(config.build.shell.clone());
    steps.register(package_type.clone(), Arc::new(step));
  }

  let store_path = store_root(args.store, &config)?;
  let store = Arc::new(LocalStore::new(&store_path));

  let mut execute_config = ExecuteConfig::default();
  if let Some(parallelism) = args.jobs.or(config.build.parallelism) {
    execute_config.parallelism = parallelism.max(1);
  }
  let build_number = args.build_number.unwrap_or_else(generate_build_number);
  execute_config.build_number = Some(build_number.clone());

  info!(
    packages = plan.package_count(),
    groups = plan.len(),
    build_number = %build_number,
    store = %store_path.display(),
    "starting build"
  );

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let report = rt.block_on(async {
    store
      .setup()
      .await
      .with_context(|| format!("Failed to set up artifact store at {}", store_path.display()))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, finishing in-flight builds");
        on_signal.cancel();
      }
    });

    let report = execute_with_cancel(&plan, Arc::new(steps), store, &execute_config, cancel).await;
    anyhow::Ok(report)
  })?;
  let elapsed = started.elapsed();

  if format.is_json() {
    print_json(&report_json(&report, build_number))?;
  } else {
    print_report(&report, &build_number, &format_duration(elapsed));
  }

  Ok(report.is_success())
}

fn report_json(report: &BuildReport, build_number: String) -> ReportJson {
  let packages = report
    .iter()
    .map(|(id, status)| ReportEntry {
      package: id.to_string(),
      status: status.label(),
      detail: match status {
        BuildStatus::Succeeded(artifact) => Some(artifact.to_string()),
        BuildStatus::Failed(err) => Some(err.to_string()),
        BuildStatus::Skipped { cause } => Some(cause.to_string()),
        BuildStatus::Cancelled => None,
      },
    })
    .collect();

  ReportJson {
    build_number,
    success: report.is_success(),
    summary: report.summary(),
    packages,
  }
}

fn print_report(report: &BuildReport, build_number: &str, elapsed: &str) {
  for (id, status) in report.iter() {
    print_status(&id.to_string(), status);
  }

  let summary = report.summary();
  println!();
  print_field("Build number", build_number);
  print_field("Succeeded", summary.succeeded);
  print_field("Failed", summary.failed);
  print_field("Skipped", summary.skipped);
  print_field("Cancelled", summary.cancelled);
  print_field("Elapsed", elapsed);
  println!();

  if report.is_success() {
    announce(Mark::Done, &format!("Built {} package(s)", summary.succeeded));
  } else if summary.cancelled > 0 && summary.failed == 0 {
    announce(Mark::Cancelled, "Build cancelled");
  } else {
    announce(Mark::Failed, &format!("{} package(s) failed", summary.failed));
  }
}
