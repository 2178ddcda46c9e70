//! Test utilities for zbuild-lib.
//!
//! Package fixtures and fake build steps shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::BoxError;
use crate::execute::{ArtifactContents, BuildContext, BuildInputs, BuildStep};
use crate::model::{Artifact, Dependencies, Package, PackageId};

/// Identity of a test package: `test/<name>-1.0`.
pub fn id(name: &str) -> PackageId {
  PackageId::new("test", name, "1.0")
}

/// A test package of type `test` with the given compile and test dependencies.
pub fn pkg(name: &str, compile: &[&str], test: &[&str]) -> Package {
  let deps = Dependencies {
    compile: compile.iter().map(|n| id(n)).collect(),
    test: test.iter().map(|n| id(n)).collect(),
  };
  Package::new(id(name), "test", deps)
}

pub fn registry<'a>(packages: impl IntoIterator<Item = &'a Package>) -> BTreeMap<PackageId, Package> {
  packages.into_iter().map(|p| (p.id(), p.clone())).collect()
}

pub fn artifact(package: &Package, build_number: &str) -> Artifact {
  Artifact::new(package.clone(), build_number)
}

/// Build step that always produces the same bytes.
pub struct StaticStep(pub &'static [u8]);

#[async_trait]
impl BuildStep for StaticStep {
  async fn build(&self, _ctx: &BuildContext) -> Result<ArtifactContents, BoxError> {
    Ok(Box::new(Cursor::new(self.0.to_vec())))
  }
}

#[derive(Default)]
struct FakeStepState {
  invocations: Mutex<Vec<PackageId>>,
  inputs: Mutex<BTreeMap<PackageId, BuildInputs>>,
  running: AtomicUsize,
  max_running: AtomicUsize,
}

/// Configurable build step that records how it was driven.
///
/// Produces `built <id>` for every package unless told otherwise. Clones
/// share their recorded state.
#[derive(Clone, Default)]
pub struct FakeStep {
  failing: BTreeSet<String>,
  panicking: BTreeSet<String>,
  broken: BTreeSet<String>,
  delay: Option<Duration>,
  cancel_on: Option<(String, CancellationToken)>,
  state: Arc<FakeStepState>,
}

impl FakeStep {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing(mut self, name: &str) -> Self {
    self.failing.insert(name.to_string());
    self
  }

  /// The output stream for `name` errors while being read.
  pub fn broken_stream(mut self, name: &str) -> Self {
    self.broken.insert(name.to_string());
    self
  }

  pub fn panicking(mut self, name: &str) -> Self {
    self.panicking.insert(name.to_string());
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// Cancel `token` while building `name`; the build itself succeeds.
  pub fn cancelling_on(mut self, name: &str, token: CancellationToken) -> Self {
    self.cancel_on = Some((name.to_string(), token));
    self
  }

  pub fn invocations(&self) -> Vec<PackageId> {
    self.state.invocations.lock().unwrap().clone()
  }

  pub fn inputs_of(&self, id: &PackageId) -> Option<BuildInputs> {
    self.state.inputs.lock().unwrap().get(id).cloned()
  }

  pub fn max_concurrency(&self) -> usize {
    self.state.max_running.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl BuildStep for FakeStep {
  async fn build(&self, ctx: &BuildContext) -> Result<ArtifactContents, BoxError> {
    let id = ctx.package_id();
    let name = id.name.clone();

    self.state.invocations.lock().unwrap().push(id.clone());
    self.state.inputs.lock().unwrap().insert(id.clone(), ctx.inputs.clone());

    let running = self.state.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.state.max_running.fetch_max(running, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self.state.running.fetch_sub(1, Ordering::SeqCst);

    if self.panicking.contains(&name) {
      panic!("step panicked while building {id}");
    }
    if self.failing.contains(&name) {
      return Err(format!("build of {id} failed").into());
    }
    if let Some((target, token)) = &self.cancel_on
      && *target == name
    {
      token.cancel();
    }
    if self.broken.contains(&name) {
      return Ok(Box::new(BrokenReader));
    }

    Ok(Box::new(Cursor::new(format!("built {id}").into_bytes())))
  }
}

struct BrokenReader;

impl AsyncRead for BrokenReader {
  fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    Poll::Ready(Err(io::Error::other("stream broke")))
  }
}
