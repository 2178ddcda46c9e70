//! Build order resolution.
//!
//! Turns a finished [`DependencyGraph`] into a [`BuildPlan`]: an ordered list
//! of groups in which every package's dependencies sit in earlier groups and
//! no two packages in one group depend on each other.
//!
//! Grouping is Kahn's algorithm applied level by level, so the plan has the
//! fewest groups the dependency edges allow. Within a group packages are
//! ordered by identity, which makes plans reproducible across runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::graph::DependencyGraph;
use crate::model::{Package, PackageId};

/// A dependency cycle, starting at its lowest-identity member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle(pub Vec<PackageId>);

impl fmt::Display for Cycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for id in &self.0 {
      write!(f, "{} -> ", id)?;
    }
    match self.0.first() {
      Some(first) => write!(f, "{}", first),
      None => Ok(()),
    }
  }
}

/// Errors that can occur while resolving a build order.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// The graph has no valid topological order.
  #[error("cyclic dependency involving {package}: {cycle}")]
  CyclicDependency { package: PackageId, cycle: Cycle },
}

/// A set of packages with no dependency edges between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildGroup {
  packages: Vec<Package>,
}

impl BuildGroup {
  /// Packages in the group, ordered by identity.
  pub fn packages(&self) -> &[Package] {
    &self.packages
  }

  pub fn ids(&self) -> Vec<PackageId> {
    self.packages.iter().map(Package::id).collect()
  }

  pub fn len(&self) -> usize {
    self.packages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.packages.is_empty()
  }
}

/// Ordered build groups. Read-only once resolved.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildPlan {
  groups: Vec<BuildGroup>,
  #[serde(skip)]
  index: BTreeMap<PackageId, (usize, usize)>,
}

impl BuildPlan {
  fn from_groups(groups: Vec<BuildGroup>) -> Self {
    let mut index = BTreeMap::new();
    for (group_idx, group) in groups.iter().enumerate() {
      for (pos, package) in group.packages.iter().enumerate() {
        index.insert(package.id(), (group_idx, pos));
      }
    }
    Self { groups, index }
  }

  pub fn groups(&self) -> &[BuildGroup] {
    &self.groups
  }

  /// Number of groups.
  pub fn len(&self) -> usize {
    self.groups.len()
  }

  pub fn is_empty(&self) -> bool {
    self.groups.is_empty()
  }

  pub fn package_count(&self) -> usize {
    self.index.len()
  }

  /// All packages in build order.
  pub fn packages(&self) -> impl Iterator<Item = &Package> {
    self.groups.iter().flat_map(|group| group.packages.iter())
  }

  pub fn package(&self, id: &PackageId) -> Option<&Package> {
    self
      .index
      .get(id)
      .map(|&(group_idx, pos)| &self.groups[group_idx].packages[pos])
  }

  /// Index of the group containing `id`.
  pub fn group_index(&self, id: &PackageId) -> Option<usize> {
    self.index.get(id).map(|&(group_idx, _)| group_idx)
  }

  /// Transitive compile dependencies of `id`, ordered by identity.
  ///
  /// Test edges are not followed: a dependency's test dependencies are never
  /// inputs to its consumers.
  pub fn compile_closure(&self, id: &PackageId) -> Vec<PackageId> {
    self.compile_closure_set(id).into_iter().collect()
  }

  /// Packages needed only to validate `id`: its direct test dependencies and
  /// their compile closures, minus anything already in its compile closure.
  pub fn test_inputs(&self, id: &PackageId) -> Vec<PackageId> {
    let Some(package) = self.package(id) else {
      return Vec::new();
    };

    let compile = self.compile_closure_set(id);
    let mut inputs = BTreeSet::new();

    for test_dep in &package.dependencies.test {
      inputs.insert(test_dep.clone());
      inputs.extend(self.compile_closure_set(test_dep));
    }

    inputs
      .into_iter()
      .filter(|dep| dep != id && !compile.contains(dep))
      .collect()
  }

  fn compile_closure_set(&self, id: &PackageId) -> BTreeSet<PackageId> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<PackageId> = match self.package(id) {
      Some(package) => package.dependencies.compile.clone(),
      None => return seen,
    };

    while let Some(dep) = stack.pop() {
      if !seen.insert(dep.clone()) {
        continue;
      }
      if let Some(package) = self.package(&dep) {
        stack.extend(package.dependencies.compile.iter().cloned());
      }
    }

    seen
  }
}

/// Resolve a dependency graph into a build plan.
///
/// Fails with [`ResolveError::CyclicDependency`] if the graph contains a
/// cycle; no partial plan is returned in that case.
pub fn resolve(graph: &DependencyGraph) -> Result<BuildPlan, ResolveError> {
  // Number of unresolved dependencies per package.
  let mut pending: BTreeMap<PackageId, usize> = BTreeMap::new();
  let mut dependents: BTreeMap<PackageId, BTreeSet<PackageId>> = BTreeMap::new();

  for package in graph.packages() {
    let id = package.id();
    let deps = graph.dependency_ids(&id);
    pending.insert(id.clone(), deps.len());
    for dep in deps {
      dependents.entry(dep).or_default().insert(id.clone());
    }
  }

  let mut remaining: BTreeSet<PackageId> = pending.keys().cloned().collect();
  let mut groups = Vec::new();

  while !remaining.is_empty() {
    let ready: Vec<PackageId> = remaining.iter().filter(|id| pending[*id] == 0).cloned().collect();

    if ready.is_empty() {
      let cycle = find_cycle(graph, &remaining);
      let package = cycle.0[0].clone();
      return Err(ResolveError::CyclicDependency { package, cycle });
    }

    for id in &ready {
      remaining.remove(id);
      for dependent in dependents.get(id).into_iter().flatten() {
        if let Some(count) = pending.get_mut(dependent) {
          *count = count.saturating_sub(1);
        }
      }
    }

    debug!(group = groups.len(), packages = ready.len(), "resolved build group");

    let packages = ready
      .iter()
      .filter_map(|id| graph.package(id).cloned())
      .collect();
    groups.push(BuildGroup { packages });
  }

  let plan = BuildPlan::from_groups(groups);
  info!(groups = plan.len(), packages = plan.package_count(), "build plan resolved");

  Ok(plan)
}

/// Walk unresolved dependency edges from the lowest remaining package until a
/// package repeats.
///
/// Every remaining package still has at least one remaining dependency, so the
/// walk cannot dead-end.
fn find_cycle(graph: &DependencyGraph, remaining: &BTreeSet<PackageId>) -> Cycle {
  let mut path: Vec<PackageId> = Vec::new();
  let mut positions: BTreeMap<PackageId, usize> = BTreeMap::new();
  let mut current = remaining.iter().next().cloned();

  while let Some(id) = current {
    if let Some(&start) = positions.get(&id) {
      let mut cycle = path.split_off(start);
      if let Some(min_pos) = cycle.iter().enumerate().min_by(|a, b| a.1.cmp(b.1)).map(|(pos, _)| pos) {
        cycle.rotate_left(min_pos);
      }
      return Cycle(cycle);
    }

    positions.insert(id.clone(), path.len());
    current = graph
      .dependency_ids(&id)
      .into_iter()
      .find(|dep| remaining.contains(dep));
    path.push(id);
  }

  // Unreachable for a set produced by `resolve`; report what was walked.
  Cycle(path)
}
