//! Dependency graph construction.
//!
//! Starting from one or more root packages, the builder discovers every
//! package reachable through compile and test dependencies, resolving each
//! reference through an injected [`PackageLookup`]. The result is a directed
//! graph with edges from a dependent to each of its dependencies.
//!
//! Cycles are accepted here and reported by the resolver, which can name the
//! offending path.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use thiserror::Error;
use tracing::{debug, trace};

use crate::BoxError;
use crate::model::{DependencyKind, Package, PackageId};

/// Resolves a dependency reference to its full package definition.
///
/// Returning `Ok(None)` means the reference is unknown. `Err` is reserved for
/// failures of the lookup itself (e.g. an unreadable build file).
pub trait PackageLookup {
  fn lookup(&self, reference: &PackageId) -> Result<Option<Package>, BoxError>;
}

impl PackageLookup for HashMap<PackageId, Package> {
  fn lookup(&self, reference: &PackageId) -> Result<Option<Package>, BoxError> {
    Ok(self.get(reference).cloned())
  }
}

impl PackageLookup for BTreeMap<PackageId, Package> {
  fn lookup(&self, reference: &PackageId) -> Result<Option<Package>, BoxError> {
    Ok(self.get(reference).cloned())
  }
}

impl<T: PackageLookup + ?Sized> PackageLookup for &T {
  fn lookup(&self, reference: &PackageId) -> Result<Option<Package>, BoxError> {
    (**self).lookup(reference)
  }
}

/// Errors that can occur while building the dependency graph.
#[derive(Debug, Error)]
pub enum GraphError {
  /// A declared dependency is not known to the lookup.
  #[error("unresolved dependency {reference} (required by {dependent})")]
  UnresolvedDependency { dependent: PackageId, reference: PackageId },

  /// The lookup itself failed.
  #[error("failed to look up {reference} (required by {dependent}): {source}")]
  DependencyLookupFailed {
    dependent: PackageId,
    reference: PackageId,
    #[source]
    source: BoxError,
  },

  /// The lookup answered with a different package than the one requested.
  #[error("lookup for {requested} returned {returned}")]
  IdentityMismatch { requested: PackageId, returned: PackageId },
}

/// A directed graph of packages connected by compile and test edges.
///
/// Read-only once built.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
  graph: DiGraph<Package, DependencyKind>,
  nodes: BTreeMap<PackageId, NodeIndex>,
  roots: Vec<PackageId>,
}

impl DependencyGraph {
  /// Build the graph reachable from a single root package.
  pub fn build(root: Package, lookup: &dyn PackageLookup) -> Result<Self, GraphError> {
    Self::build_all([root], lookup)
  }

  /// Build the graph reachable from several roots, e.g. every package in a workspace.
  ///
  /// Traversal is breadth-first. Packages already visited are never looked up
  /// again, so diamond dependencies collapse into a single node.
  pub fn build_all(roots: impl IntoIterator<Item = Package>, lookup: &dyn PackageLookup) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes: BTreeMap<PackageId, NodeIndex> = BTreeMap::new();
    let mut root_ids = Vec::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();

    for root in roots {
      let id = root.id();
      if nodes.contains_key(&id) {
        continue;
      }
      let idx = graph.add_node(root);
      nodes.insert(id.clone(), idx);
      root_ids.push(id);
      queue.push_back(idx);
    }

    while let Some(idx) = queue.pop_front() {
      let dependent: Package = graph[idx].clone();
      let dependent_id = dependent.id();
      trace!(package = %dependent_id, "visiting package");

      for (reference, kind) in dependent.dependencies.iter_kinds() {
        let dep_idx = match nodes.get(reference) {
          Some(&existing) => existing,
          None => {
            let package = resolve_reference(lookup, &dependent_id, reference)?;
            debug!(package = %reference, dependent = %dependent_id, "discovered dependency");
            let new_idx = graph.add_node(package);
            nodes.insert(reference.clone(), new_idx);
            queue.push_back(new_idx);
            new_idx
          }
        };

        graph.add_edge(idx, dep_idx, kind);
      }
    }

    debug!(
      packages = graph.node_count(),
      edges = graph.edge_count(),
      "dependency graph built"
    );

    Ok(Self {
      graph,
      nodes,
      roots: root_ids,
    })
  }

  /// The packages the graph was built from, in the order given.
  pub fn roots(&self) -> &[PackageId] {
    &self.roots
  }

  /// Number of packages in the graph.
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, id: &PackageId) -> bool {
    self.nodes.contains_key(id)
  }

  pub fn package(&self, id: &PackageId) -> Option<&Package> {
    self.nodes.get(id).map(|&idx| &self.graph[idx])
  }

  /// All packages, ordered by identity.
  pub fn packages(&self) -> impl Iterator<Item = &Package> {
    self.nodes.values().map(|&idx| &self.graph[idx])
  }

  /// Total number of dependency edges.
  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }

  /// Direct dependencies of a package with the kind of each edge.
  ///
  /// Ordered by identity, then kind. A package declaring the same dependency
  /// as both compile and test appears twice.
  pub fn dependencies(&self, id: &PackageId) -> Vec<(PackageId, DependencyKind)> {
    self.neighbors(id, Direction::Outgoing)
  }

  /// Direct dependents of a package with the kind of each edge.
  pub fn dependents(&self, id: &PackageId) -> Vec<(PackageId, DependencyKind)> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Distinct direct dependencies, ignoring edge kind.
  pub(crate) fn dependency_ids(&self, id: &PackageId) -> BTreeSet<PackageId> {
    self.dependencies(id).into_iter().map(|(dep, _)| dep).collect()
  }

  fn neighbors(&self, id: &PackageId, direction: Direction) -> Vec<(PackageId, DependencyKind)> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };

    let mut out: Vec<(PackageId, DependencyKind)> = self
      .graph
      .edges_directed(idx, direction)
      .map(|edge| {
        let other = match direction {
          Direction::Outgoing => edge.target(),
          Direction::Incoming => edge.source(),
        };
        (self.graph[other].id(), *edge.weight())
      })
      .collect();
    out.sort();
    out
  }
}

fn resolve_reference(
  lookup: &dyn PackageLookup,
  dependent: &PackageId,
  reference: &PackageId,
) -> Result<Package, GraphError> {
  let package = lookup
    .lookup(reference)
    .map_err(|source| GraphError::DependencyLookupFailed {
      dependent: dependent.clone(),
      reference: reference.clone(),
      source,
    })?
    .ok_or_else(|| GraphError::UnresolvedDependency {
      dependent: dependent.clone(),
      reference: reference.clone(),
    })?;

  let returned = package.id();
  if returned != *reference {
    return Err(GraphError::IdentityMismatch {
      requested: reference.clone(),
      returned,
    });
  }

  Ok(package)
}
