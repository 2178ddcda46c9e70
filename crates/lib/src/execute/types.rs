//! Types for build execution.
//!
//! This module defines the configuration, error and report types used when
//! executing a build plan.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::BoxError;
use crate::model::{Artifact, ArtifactKey, PackageId};
use crate::store::StoreError;

/// Errors that fail a single package during execution.
///
/// These never abort a run; they are recorded in the [`BuildReport`].
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// The build step returned an error.
  #[error("build step failed for {package}: {source}")]
  BuildStepFailed {
    package: PackageId,
    #[source]
    source: BoxError,
  },

  /// The artifact store rejected the write.
  #[error("artifact store error: {0}")]
  Store(#[from] StoreError),

  /// Copying build output into the store failed midway.
  #[error("failed to stream output of {artifact}: {source}")]
  Stream {
    artifact: ArtifactKey,
    #[source]
    source: io::Error,
  },

  /// The task running the build panicked.
  #[error("build task for {package} panicked: {message}")]
  TaskPanicked { package: PackageId, message: String },

  /// The worker pool shut down before the package could start.
  #[error("worker pool closed before {0} could start")]
  WorkerPoolClosed(PackageId),
}

/// Terminal state of one package in a run.
#[derive(Debug)]
pub enum BuildStatus {
  /// Built and stored.
  Succeeded(Artifact),
  /// The build step or the store write failed.
  Failed(ExecuteError),
  /// Not attempted because `cause` (a package this one depends on,
  /// directly or transitively) failed.
  Skipped { cause: PackageId },
  /// Not attempted because the run was cancelled first.
  Cancelled,
}

impl BuildStatus {
  pub fn is_succeeded(&self) -> bool {
    matches!(self, BuildStatus::Succeeded(_))
  }

  pub fn artifact(&self) -> Option<&Artifact> {
    match self {
      BuildStatus::Succeeded(artifact) => Some(artifact),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ExecuteError> {
    match self {
      BuildStatus::Failed(err) => Some(err),
      _ => None,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      BuildStatus::Succeeded(_) => "succeeded",
      BuildStatus::Failed(_) => "failed",
      BuildStatus::Skipped { .. } => "skipped",
      BuildStatus::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for BuildStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildStatus::Succeeded(artifact) => write!(f, "succeeded ({})", artifact.build_number),
      BuildStatus::Failed(err) => write!(f, "failed: {}", err),
      BuildStatus::Skipped { cause } => write!(f, "skipped: dependency {} failed", cause),
      BuildStatus::Cancelled => write!(f, "cancelled"),
    }
  }
}

/// Counts of each terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
  pub succeeded: usize,
  pub failed: usize,
  pub skipped: usize,
  pub cancelled: usize,
}

/// Outcome of executing a build plan: one status per package.
///
/// A run is successful only if every package succeeded. Partial failure is
/// reported here rather than as a single error, so the cause of each
/// failure stays retrievable.
#[derive(Debug, Default)]
pub struct BuildReport {
  entries: BTreeMap<PackageId, BuildStatus>,
}

impl BuildReport {
  pub(crate) fn record(&mut self, id: PackageId, status: BuildStatus) {
    self.entries.insert(id, status);
  }

  pub fn status(&self, id: &PackageId) -> Option<&BuildStatus> {
    self.entries.get(id)
  }

  /// All entries, ordered by package identity.
  pub fn iter(&self) -> impl Iterator<Item = (&PackageId, &BuildStatus)> {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Returns true if every package succeeded.
  pub fn is_success(&self) -> bool {
    self.entries.values().all(BuildStatus::is_succeeded)
  }

  pub fn succeeded(&self) -> Vec<(&PackageId, &Artifact)> {
    self
      .entries
      .iter()
      .filter_map(|(id, status)| status.artifact().map(|artifact| (id, artifact)))
      .collect()
  }

  pub fn failed(&self) -> Vec<(&PackageId, &ExecuteError)> {
    self
      .entries
      .iter()
      .filter_map(|(id, status)| status.error().map(|err| (id, err)))
      .collect()
  }

  /// Skipped packages with the failed package that caused each skip.
  pub fn skipped(&self) -> Vec<(&PackageId, &PackageId)> {
    self
      .entries
      .iter()
      .filter_map(|(id, status)| match status {
        BuildStatus::Skipped { cause } => Some((id, cause)),
        _ => None,
      })
      .collect()
  }

  pub fn cancelled(&self) -> Vec<&PackageId> {
    self
      .entries
      .iter()
      .filter(|(_, status)| matches!(status, BuildStatus::Cancelled))
      .map(|(id, _)| id)
      .collect()
  }

  pub fn summary(&self) -> ReportSummary {
    let mut summary = ReportSummary::default();
    for status in self.entries.values() {
      match status {
        BuildStatus::Succeeded(_) => summary.succeeded += 1,
        BuildStatus::Failed(_) => summary.failed += 1,
        BuildStatus::Skipped { .. } => summary.skipped += 1,
        BuildStatus::Cancelled => summary.cancelled += 1,
      }
    }
    summary
  }
}

/// Configuration for build execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of builds to execute in parallel within a group.
  pub parallelism: usize,

  /// Build number shared by every artifact of the run.
  /// If None, a UTC timestamp is generated when the run starts.
  pub build_number: Option<String>,
}

impl ExecuteConfig {
  /// The configured build number, or a freshly generated one.
  pub fn resolve_build_number(&self) -> String {
    self.build_number.clone().unwrap_or_else(generate_build_number)
  }
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      build_number: None,
    }
  }
}

/// Generate a build number from the current UTC time, with millisecond precision.
pub fn generate_build_number() -> String {
  chrono::Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
