//! The build step capability.
//!
//! A build step turns one package into artifact bytes. The orchestrator
//! treats it as a black box: returning `Ok` means a complete output is ready
//! to be stored.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::BoxError;
use crate::model::{Artifact, Package, PackageId};
use crate::plan::BuildPlan;
use crate::store::ArtifactStore;

/// Output of a build step, streamed into the artifact store.
pub type ArtifactContents = Box<dyn AsyncRead + Send + Unpin>;

/// Artifacts a build may read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInputs {
  /// The transitive compile closure.
  pub compile: Vec<Artifact>,
  /// Test dependencies and their compile closures, excluding `compile`.
  pub test: Vec<Artifact>,
}

impl BuildInputs {
  /// Collect the inputs of `id` from artifacts built earlier in the run.
  pub(crate) fn collect(plan: &BuildPlan, id: &PackageId, built: &BTreeMap<PackageId, Artifact>) -> Self {
    let pick = |ids: Vec<PackageId>| -> Vec<Artifact> { ids.iter().filter_map(|dep| built.get(dep).cloned()).collect() };
    Self {
      compile: pick(plan.compile_closure(id)),
      test: pick(plan.test_inputs(id)),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.compile.is_empty() && self.test.is_empty()
  }
}

/// Everything a build step gets to see.
#[derive(Clone)]
pub struct BuildContext {
  /// The artifact being produced. Its build number is fixed before the step runs.
  pub artifact: Artifact,
  pub inputs: BuildInputs,
  /// Store holding the input artifacts.
  pub store: Arc<dyn ArtifactStore>,
}

impl BuildContext {
  pub fn package(&self) -> &Package {
    &self.artifact.package
  }

  pub fn package_id(&self) -> PackageId {
    self.artifact.package_id()
  }
}

/// Builds a single package.
#[async_trait]
pub trait BuildStep: Send + Sync {
  async fn build(&self, ctx: &BuildContext) -> Result<ArtifactContents, BoxError>;
}

#[derive(Debug, Error)]
pub enum StepError {
  #[error("no build step registered for package type '{0}'")]
  UnknownPackageType(String),
}

/// Dispatches to a build step by package type.
#[derive(Clone, Default)]
pub struct BuildStepRegistry {
  steps: BTreeMap<String, Arc<dyn BuildStep>>,
}

impl BuildStepRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register the step for a package type, replacing any previous one.
  pub fn register(&mut self, package_type: impl Into<String>, step: Arc<dyn BuildStep>) {
    self.steps.insert(package_type.into(), step);
  }

  pub fn with(mut self, package_type: impl Into<String>, step: Arc<dyn BuildStep>) -> Self {
    self.register(package_type, step);
    self
  }

  pub fn get(&self, package_type: &str) -> Option<&Arc<dyn BuildStep>> {
    self.steps.get(package_type)
  }

  /// Registered package types, sorted.
  pub fn types(&self) -> impl Iterator<Item = &str> {
    self.steps.keys().map(String::as_str)
  }
}

#[async_trait]
impl BuildStep for BuildStepRegistry {
  async fn build(&self, ctx: &BuildContext) -> Result<ArtifactContents, BoxError> {
    let package_type = &ctx.package().package_type;
    let step = self
      .get(package_type)
      .ok_or_else(|| StepError::UnknownPackageType(package_type.clone()))?;
    step.build(ctx).await
  }
}
