//! End-to-end scenarios through the public API: graph, plan, execute, store.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use zbuild_lib::BoxError;
use zbuild_lib::execute::{ArtifactContents, BuildContext, BuildStatus, BuildStep, ExecuteConfig, execute};
use zbuild_lib::graph::DependencyGraph;
use zbuild_lib::model::{Artifact, Dependencies, Package, PackageId};
use zbuild_lib::plan::{ResolveError, resolve};
use zbuild_lib::store::{ArtifactStore, ArtifactWriter, LocalStore, MemoryStore, StoreError};

fn id(name: &str) -> PackageId {
  PackageId::new("acme", name, "1.0")
}

fn package(name: &str, compile: &[&str], test: &[&str]) -> Package {
  Package::new(
    id(name),
    "fake",
    Dependencies {
      compile: compile.iter().map(|n| id(n)).collect(),
      test: test.iter().map(|n| id(n)).collect(),
    },
  )
}

fn lookup(packages: &[&Package]) -> BTreeMap<PackageId, Package> {
  packages.iter().map(|p| (p.id(), (*p).clone())).collect()
}

/// Writes `<id>:<build number>`, failing for the named packages.
struct EchoStep {
  failing: Vec<PackageId>,
}

#[async_trait]
impl BuildStep for EchoStep {
  async fn build(&self, ctx: &BuildContext) -> Result<ArtifactContents, BoxError> {
    let id = ctx.package_id();
    if self.failing.contains(&id) {
      return Err(format!("compiler error in {id}").into());
    }
    Ok(Box::new(Cursor::new(format!("{}:{}", id, ctx.artifact.build_number).into_bytes())))
  }
}

#[test]
fn core_lib_app_resolve_into_three_groups() {
  let core = package("core", &[], &[]);
  let lib = package("lib", &["core"], &[]);
  let app = package("app", &["lib"], &["core"]);
  let registry = lookup(&[&core, &lib, &app]);

  let graph = DependencyGraph::build(app.clone(), &registry).unwrap();
  let plan = resolve(&graph).unwrap();

  let groups: Vec<Vec<PackageId>> = plan.groups().iter().map(|g| g.ids()).collect();
  assert_eq!(groups, vec![vec![core.id()], vec![lib.id()], vec![app.id()]]);
}

#[test]
fn mutual_compile_dependency_is_a_cycle() {
  let a = package("a", &["b"], &[]);
  let b = package("b", &["a"], &[]);
  let registry = lookup(&[&a, &b]);

  let graph = DependencyGraph::build(a.clone(), &registry).unwrap();
  match resolve(&graph) {
    Err(ResolveError::CyclicDependency { package, cycle }) => {
      assert!(package == a.id() || package == b.id());
      assert!(cycle.0.contains(&a.id()) && cycle.0.contains(&b.id()));
    }
    Ok(plan) => panic!("expected a cycle, got {} groups", plan.len()),
  }
}

#[tokio::test]
async fn failed_core_skips_dependents_only() {
  let core = package("core", &[], &[]);
  let lib = package("lib", &["core"], &[]);
  let app = package("app", &["lib"], &["core"]);
  let util = package("util", &[], &[]);
  let registry = lookup(&[&core, &lib, &app, &util]);

  let graph = DependencyGraph::build_all([app.clone(), util.clone()], &registry).unwrap();
  let plan = resolve(&graph).unwrap();
  let step = EchoStep {
    failing: vec![core.id()],
  };
  let config = ExecuteConfig {
    parallelism: 2,
    build_number: Some("7".to_string()),
  };

  let report = execute(&plan, Arc::new(step), Arc::new(MemoryStore::new()), &config).await;

  assert!(!report.is_success());
  assert!(matches!(report.status(&core.id()), Some(BuildStatus::Failed(_))));
  assert!(matches!(report.status(&lib.id()), Some(BuildStatus::Skipped { .. })));
  assert!(matches!(report.status(&app.id()), Some(BuildStatus::Skipped { .. })));
  assert!(report.status(&util.id()).unwrap().is_succeeded());

  let failure = &report.failed()[0];
  assert_eq!(failure.0, &core.id());
  assert!(failure.1.to_string().contains("compiler error in acme/core-1.0"));
}

#[tokio::test]
async fn local_store_round_trip_through_a_run() {
  let temp = TempDir::new().unwrap();
  let core = package("core", &[], &[]);
  let lib = package("lib", &["core"], &[]);
  let registry = lookup(&[&core, &lib]);
  let plan = resolve(&DependencyGraph::build(lib.clone(), &registry).unwrap()).unwrap();

  let store = Arc::new(LocalStore::new(temp.path()));
  store.setup().await.unwrap();
  let config = ExecuteConfig {
    parallelism: 1,
    build_number: Some("3".to_string()),
  };

  let report = execute(&plan, Arc::new(EchoStep { failing: vec![] }), store.clone(), &config).await;
  assert!(report.is_success());

  let artifact = Artifact::new(lib.clone(), "3");
  let mut reader = store.open_reader(&artifact).await.unwrap();
  let mut contents = String::new();
  reader.read_to_string(&mut contents).await.unwrap();
  assert_eq!(contents, "acme/lib-1.0:3");
}

#[tokio::test]
async fn concurrent_writers_never_both_succeed() {
  let temp = TempDir::new().unwrap();
  let store = Arc::new(LocalStore::new(temp.path()));
  store.setup().await.unwrap();
  let artifact = Artifact::new(package("core", &[], &[]), "1");

  let mut handles = Vec::new();
  for writer in 0..8u8 {
    let store = store.clone();
    let artifact = artifact.clone();
    handles.push(tokio::spawn(async move {
      let mut w = store.open_writer(&artifact).await?;
      w.write_all(&[writer; 64]).await.map_err(|e| StoreError::Io {
        path: "writer".into(),
        source: e,
      })?;
      w.commit().await?;
      Ok::<u8, StoreError>(writer)
    }));
  }

  let mut winners = Vec::new();
  for handle in handles {
    match handle.await.unwrap() {
      Ok(writer) => winners.push(writer),
      Err(StoreError::ArtifactAlreadyExists(_)) => {}
      Err(other) => panic!("unexpected store error: {other}"),
    }
  }
  assert_eq!(winners.len(), 1);

  let mut reader = store.open_reader(&artifact).await.unwrap();
  let mut bytes = Vec::new();
  reader.read_to_end(&mut bytes).await.unwrap();
  assert_eq!(bytes, vec![winners[0]; 64]);
}
