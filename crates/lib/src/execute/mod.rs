//! Build execution.
//!
//! This module runs a resolved [`BuildPlan`]. It handles:
//! - Group-by-group ordering (a group starts only when the previous one is done)
//! - Bounded parallel execution of the packages within a group
//! - Streaming each build's output into the artifact store
//! - Failure propagation: dependents of a failed package are skipped, unrelated
//!   packages keep building
//! - Cancellation between groups

pub mod command;
pub mod step;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::model::{Artifact, Package, PackageId};
use crate::plan::BuildPlan;
use crate::store::ArtifactStore;

pub use command::{CommandBuildStep, CommandError};
pub use step::{ArtifactContents, BuildContext, BuildInputs, BuildStep, BuildStepRegistry, StepError};
pub use types::{BuildReport, BuildStatus, ExecuteConfig, ExecuteError, ReportSummary, generate_build_number};

/// Execute a build plan.
///
/// This is the main entry point for build execution. It:
/// 1. Walks the plan's groups in order
/// 2. Skips packages with a failed (or skipped) dependency
/// 3. Runs the remaining packages of a group in parallel, bounded by
///    `config.parallelism`
/// 4. Stores each successful build's output
///
/// Never fails as a whole: every package of the plan ends up in the returned
/// report with its own status.
pub async fn execute(
  plan: &BuildPlan,
  step: Arc<dyn BuildStep>,
  store: Arc<dyn ArtifactStore>,
  config: &ExecuteConfig,
) -> BuildReport {
  execute_with_cancel(plan, step, store, config, CancellationToken::new()).await
}

/// Execute a build plan, stopping between groups once `cancel` fires.
///
/// Builds already running are allowed to finish. Packages in groups that were
/// never started are reported as [`BuildStatus::Cancelled`]; artifacts from
/// completed groups stay in the store.
pub async fn execute_with_cancel(
  plan: &BuildPlan,
  step: Arc<dyn BuildStep>,
  store: Arc<dyn ArtifactStore>,
  config: &ExecuteConfig,
  cancel: CancellationToken,
) -> BuildReport {
  let build_number = config.resolve_build_number();

  info!(
    groups = plan.len(),
    packages = plan.package_count(),
    build_number = %build_number,
    parallelism = config.parallelism,
    "starting build execution"
  );

  let mut report = BuildReport::default();
  let mut built: BTreeMap<PackageId, Artifact> = BTreeMap::new();
  // Failed or skipped package -> the failed package at the root of it.
  let mut blocked: BTreeMap<PackageId, PackageId> = BTreeMap::new();

  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));

  for (wave_idx, group) in plan.groups().iter().enumerate() {
    if cancel.is_cancelled() {
      warn!(wave = wave_idx, "build cancelled, not starting remaining groups");
      for package in plan.groups()[wave_idx..].iter().flat_map(|g| g.packages()) {
        report.record(package.id(), BuildStatus::Cancelled);
      }
      break;
    }

    debug!(wave = wave_idx, packages = group.len(), "executing wave");

    let mut ready = Vec::new();

    for package in group.packages() {
      let id = package.id();

      // Existence check over compile and test dependencies alike: either kind
      // of failed dependency blocks the package.
      let cause = package
        .dependencies
        .all()
        .iter()
        .filter_map(|dep| blocked.get(dep))
        .min()
        .cloned();

      match cause {
        Some(cause) => {
          warn!(package = %id, cause = %cause, "skipping package due to failed dependency");
          blocked.insert(id.clone(), cause.clone());
          report.record(id, BuildStatus::Skipped { cause });
        }
        None => ready.push(package.clone()),
      }
    }

    if ready.is_empty() {
      continue;
    }

    let wave_results = execute_wave(
      &ready,
      plan,
      &built,
      &build_number,
      step.clone(),
      store.clone(),
      semaphore.clone(),
    )
    .await;

    for (id, result) in wave_results {
      match result {
        Ok(artifact) => {
          info!(package = %id, build_number = %artifact.build_number, "package built");
          built.insert(id.clone(), artifact.clone());
          report.record(id, BuildStatus::Succeeded(artifact));
        }
        Err(e) => {
          error!(package = %id, error = %e, "package failed");
          blocked.insert(id.clone(), id.clone());
          report.record(id, BuildStatus::Failed(e));
        }
      }
    }
  }

  let summary = report.summary();
  info!(
    succeeded = summary.succeeded,
    failed = summary.failed,
    skipped = summary.skipped,
    cancelled = summary.cancelled,
    "build execution complete"
  );

  report
}

/// Execute one group's ready packages in parallel.
///
/// Results come back in the order the packages were given.
async fn execute_wave(
  packages: &[Package],
  plan: &BuildPlan,
  built: &BTreeMap<PackageId, Artifact>,
  build_number: &str,
  step: Arc<dyn BuildStep>,
  store: Arc<dyn ArtifactStore>,
  semaphore: Arc<Semaphore>,
) -> Vec<(PackageId, Result<Artifact, ExecuteError>)> {
  let mut handles = Vec::with_capacity(packages.len());

  for package in packages {
    let id = package.id();
    let ctx = BuildContext {
      artifact: Artifact::new(package.clone(), build_number),
      inputs: BuildInputs::collect(plan, &id, built),
      store: store.clone(),
    };
    let step = step.clone();
    let store = store.clone();
    let semaphore = semaphore.clone();

    let handle = tokio::spawn(async move {
      // Acquire semaphore permit inside the task
      let Ok(_permit) = semaphore.acquire().await else {
        return Err(ExecuteError::WorkerPoolClosed(ctx.package_id()));
      };
      build_package(ctx, step.as_ref(), store.as_ref()).await
    });

    handles.push((id, handle));
  }

  let mut results = Vec::with_capacity(handles.len());

  for (id, handle) in handles {
    let result = match handle.await {
      Ok(result) => result,
      Err(e) => {
        error!(package = %id, error = %e, "build task panicked");
        Err(ExecuteError::TaskPanicked {
          package: id.clone(),
          message: panic_message(e),
        })
      }
    };
    results.push((id, result));
  }

  results
}

/// Build one package and stream its output into the store.
///
/// The writer is always released: on a failed copy it is dropped without
/// committing, which discards the partial output.
async fn build_package(
  ctx: BuildContext,
  step: &dyn BuildStep,
  store: &dyn ArtifactStore,
) -> Result<Artifact, ExecuteError> {
  let id = ctx.package_id();
  debug!(
    package = %id,
    compile_inputs = ctx.inputs.compile.len(),
    test_inputs = ctx.inputs.test.len(),
    "invoking build step"
  );

  let mut contents = step
    .build(&ctx)
    .await
    .map_err(|source| ExecuteError::BuildStepFailed {
      package: id.clone(),
      source,
    })?;

  let mut writer = store.open_writer(&ctx.artifact).await?;

  let bytes = match tokio::io::copy(&mut contents, &mut writer).await {
    Ok(bytes) => bytes,
    Err(source) => {
      drop(writer);
      return Err(ExecuteError::Stream {
        artifact: ctx.artifact.key(),
        source,
      });
    }
  };

  writer.commit().await?;
  debug!(package = %id, bytes, "artifact stored");

  Ok(ctx.artifact)
}

fn panic_message(err: JoinError) -> String {
  if !err.is_panic() {
    return err.to_string();
  }

  let payload = err.into_panic();
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use tracing_test::traced_test;

  use super::*;
  use crate::graph::DependencyGraph;
  use crate::plan::resolve;
  use crate::store::{MemoryStore, StoreError};
  use crate::util::testutil::{FakeStep, pkg, registry};

  fn plan_for(packages: &[&Package]) -> BuildPlan {
    let lookup = registry(packages.iter().copied());
    let graph = DependencyGraph::build_all(packages.iter().map(|p| (*p).clone()), &lookup).unwrap();
    resolve(&graph).unwrap()
  }

  fn test_config() -> ExecuteConfig {
    ExecuteConfig {
      parallelism: 4,
      build_number: Some("100".to_string()),
    }
  }

  #[tokio::test]
  async fn empty_plan_is_success() {
    let report = execute(
      &BuildPlan::default(),
      Arc::new(FakeStep::new()),
      Arc::new(MemoryStore::new()),
      &test_config(),
    )
    .await;

    assert!(report.is_success());
    assert!(report.is_empty());
  }

  #[tokio::test]
  async fn successful_builds_are_stored_with_the_run_build_number() {
    let core = pkg("core", &[], &[]);
    let lib = pkg("lib", &["core"], &[]);
    let plan = plan_for(&[&core, &lib]);
    let store = MemoryStore::new();

    let report = execute(&plan, Arc::new(FakeStep::new()), Arc::new(store.clone()), &test_config()).await;

    assert!(report.is_success());
    let artifact = report.status(&lib.id()).unwrap().artifact().unwrap();
    assert_eq!(artifact.build_number, "100");
    assert_eq!(store.get(artifact).unwrap().as_slice(), b"built test/lib-1.0");
    assert_eq!(store.len(), 2);
  }

  #[tokio::test]
  async fn failure_skips_dependents_but_not_unrelated_packages() {
    let core = pkg("core", &[], &[]);
    let lib = pkg("lib", &["core"], &[]);
    let app = pkg("app", &["lib"], &["core"]);
    let util = pkg("util", &[], &[]);
    let plan = plan_for(&[&core, &lib, &app, &util]);
    let step = FakeStep::new().failing("core");

    let report = execute(&plan, Arc::new(step.clone()), Arc::new(MemoryStore::new()), &test_config()).await;

    assert!(!report.is_success());
    assert!(matches!(
      report.status(&core.id()),
      Some(BuildStatus::Failed(ExecuteError::BuildStepFailed { .. }))
    ));
    // Skip cause is the root failure, even through an intermediate skip.
    assert!(matches!(report.status(&lib.id()), Some(BuildStatus::Skipped { cause }) if *cause == core.id()));
    assert!(matches!(report.status(&app.id()), Some(BuildStatus::Skipped { cause }) if *cause == core.id()));
    assert!(report.status(&util.id()).unwrap().is_succeeded());

    let invoked = step.invocations();
    assert!(!invoked.contains(&lib.id()));
    assert!(!invoked.contains(&app.id()));
  }

  #[tokio::test]
  async fn failed_test_dependency_skips_the_dependent() {
    let fixtures = pkg("fixtures", &[], &[]);
    let core = pkg("core", &[], &["fixtures"]);
    let plan = plan_for(&[&fixtures, &core]);

    let report = execute(
      &plan,
      Arc::new(FakeStep::new().failing("fixtures")),
      Arc::new(MemoryStore::new()),
      &test_config(),
    )
    .await;

    assert!(matches!(report.status(&core.id()), Some(BuildStatus::Skipped { .. })));
  }

  #[tokio::test]
  async fn store_conflict_fails_only_that_package() {
    let core = pkg("core", &[], &[]);
    let util = pkg("util", &[], &[]);
    let plan = plan_for(&[&core, &util]);
    let store = MemoryStore::new();

    // First run stores both; a second run with the same build number collides.
    let first = execute(&plan, Arc::new(FakeStep::new()), Arc::new(store.clone()), &test_config()).await;
    assert!(first.is_success());

    let second = execute(&plan, Arc::new(FakeStep::new()), Arc::new(store.clone()), &test_config()).await;
    assert!(matches!(
      second.status(&core.id()),
      Some(BuildStatus::Failed(ExecuteError::Store(StoreError::ArtifactAlreadyExists(_))))
    ));
    assert_eq!(second.failed().len(), 2);
  }

  #[tokio::test]
  async fn broken_output_stream_is_not_stored() {
    let core = pkg("core", &[], &[]);
    let plan = plan_for(&[&core]);
    let store = MemoryStore::new();

    let report = execute(
      &plan,
      Arc::new(FakeStep::new().broken_stream("core")),
      Arc::new(store.clone()),
      &test_config(),
    )
    .await;

    assert!(matches!(report.status(&core.id()), Some(BuildStatus::Failed(ExecuteError::Stream { .. }))));
    assert!(store.is_empty());
  }

  #[tokio::test]
  async fn panicking_step_fails_only_its_package() {
    let core = pkg("core", &[], &[]);
    let util = pkg("util", &[], &[]);
    let plan = plan_for(&[&core, &util]);

    let report = execute(
      &plan,
      Arc::new(FakeStep::new().panicking("core")),
      Arc::new(MemoryStore::new()),
      &test_config(),
    )
    .await;

    match report.status(&core.id()) {
      Some(BuildStatus::Failed(ExecuteError::TaskPanicked { message, .. })) => {
        assert!(message.contains("step panicked"));
      }
      other => panic!("unexpected status: {other:?}"),
    }
    assert!(report.status(&util.id()).unwrap().is_succeeded());
  }

  #[tokio::test]
  async fn inputs_follow_compile_closure_only() {
    let fixtures = pkg("fixtures", &[], &[]);
    let core = pkg("core", &[], &["fixtures"]);
    let lib = pkg("lib", &["core"], &[]);
    let app = pkg("app", &["lib"], &[]);
    let plan = plan_for(&[&fixtures, &core, &lib, &app]);
    let step = FakeStep::new();

    let report = execute(&plan, Arc::new(step.clone()), Arc::new(MemoryStore::new()), &test_config()).await;
    assert!(report.is_success());

    let inputs = step.inputs_of(&app.id()).unwrap();
    let compile: Vec<PackageId> = inputs.compile.iter().map(Artifact::package_id).collect();
    assert_eq!(compile, vec![core.id(), lib.id()]);
    assert!(inputs.test.is_empty());

    let core_inputs = step.inputs_of(&core.id()).unwrap();
    assert!(core_inputs.compile.is_empty());
    assert_eq!(core_inputs.test[0].package_id(), fixtures.id());
  }

  #[tokio::test]
  async fn parallelism_is_bounded() {
    let packages: Vec<Package> = (0..8).map(|i| pkg(&format!("p{i}"), &[], &[])).collect();
    let refs: Vec<&Package> = packages.iter().collect();
    let plan = plan_for(&refs);
    let step = FakeStep::new().with_delay(Duration::from_millis(20));

    let config = ExecuteConfig {
      parallelism: 2,
      build_number: Some("1".to_string()),
    };
    let report = execute(&plan, Arc::new(step.clone()), Arc::new(MemoryStore::new()), &config).await;

    assert!(report.is_success());
    assert_eq!(step.max_concurrency(), 2);
  }

  #[tokio::test]
  async fn groups_run_strictly_in_order() {
    let core = pkg("core", &[], &[]);
    let lib = pkg("lib", &["core"], &[]);
    let app = pkg("app", &["lib"], &[]);
    let plan = plan_for(&[&app, &lib, &core]);
    let step = FakeStep::new().with_delay(Duration::from_millis(5));

    execute(&plan, Arc::new(step.clone()), Arc::new(MemoryStore::new()), &test_config()).await;

    assert_eq!(step.invocations(), vec![core.id(), lib.id(), app.id()]);
  }

  #[tokio::test]
  async fn cancellation_stops_before_the_next_group() {
    let core = pkg("core", &[], &[]);
    let lib = pkg("lib", &["core"], &[]);
    let plan = plan_for(&[&core, &lib]);
    let store = MemoryStore::new();

    let cancel = CancellationToken::new();
    let step = FakeStep::new().cancelling_on("core", cancel.clone());

    let report = execute_with_cancel(&plan, Arc::new(step), Arc::new(store.clone()), &test_config(), cancel).await;

    // The in-flight build finished and its artifact remains retrievable.
    assert!(report.status(&core.id()).unwrap().is_succeeded());
    assert!(matches!(report.status(&lib.id()), Some(BuildStatus::Cancelled)));
    assert_eq!(store.len(), 1);
    assert!(!report.is_success());
  }

  #[tokio::test]
  #[traced_test]
  async fn skips_are_logged_with_their_cause() {
    let core = pkg("core", &[], &[]);
    let lib = pkg("lib", &["core"], &[]);
    let plan = plan_for(&[&core, &lib]);

    execute(
      &plan,
      Arc::new(FakeStep::new().failing("core")),
      Arc::new(MemoryStore::new()),
      &test_config(),
    )
    .await;

    assert!(logs_contain("skipping package due to failed dependency"));
    assert!(logs_contain("cause=test/core-1.0"));
  }
}
