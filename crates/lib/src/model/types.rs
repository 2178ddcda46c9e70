use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a package.
///
/// Ordering is lexicographic over namespace, then name, then version. Every
/// deterministic tie-break in the resolver and the report relies on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId {
  pub namespace: String,
  pub name: String,
  pub version: String,
}

impl PackageId {
  pub fn new(namespace: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
      name: name.into(),
      version: version.into(),
    }
  }
}

impl fmt::Display for PackageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}-{}", self.namespace, self.name, self.version)
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid package id '{0}': expected namespace/name-version")]
pub struct ParsePackageIdError(String);

impl FromStr for PackageId {
  type Err = ParsePackageIdError;

  /// Parses `namespace/name-version`. The version is everything after the
  /// last `-`, so names may contain dashes but versions may not.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ParsePackageIdError(s.to_string());

    let (namespace, rest) = s.split_once('/').ok_or_else(invalid)?;
    let (name, version) = rest.rsplit_once('-').ok_or_else(invalid)?;

    if namespace.is_empty() || name.is_empty() || version.is_empty() || name.contains('/') {
      return Err(invalid());
    }

    Ok(PackageId::new(namespace, name, version))
  }
}

/// How a dependency edge is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
  /// Needed to build this package and propagated to its consumers.
  Compile,
  /// Needed only to validate this package; never propagated.
  Test,
}

impl fmt::Display for DependencyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DependencyKind::Compile => write!(f, "compile"),
      DependencyKind::Test => write!(f, "test"),
    }
  }
}

/// Declared dependencies of a package, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
  #[serde(default)]
  pub compile: Vec<PackageId>,
  #[serde(default)]
  pub test: Vec<PackageId>,
}

impl Dependencies {
  /// All dependencies, compile first then test.
  ///
  /// Loses the compile/test distinction. Only use it for existence checks;
  /// anything that propagates to consumers must read `compile` directly.
  pub fn all(&self) -> Vec<PackageId> {
    let mut all = Vec::with_capacity(self.compile.len() + self.test.len());
    all.extend(self.compile.iter().cloned());
    all.extend(self.test.iter().cloned());
    all
  }

  /// All dependencies paired with the kind of edge they declare.
  pub fn iter_kinds(&self) -> impl Iterator<Item = (&PackageId, DependencyKind)> {
    self
      .compile
      .iter()
      .map(|id| (id, DependencyKind::Compile))
      .chain(self.test.iter().map(|id| (id, DependencyKind::Test)))
  }

  pub fn is_empty(&self) -> bool {
    self.compile.is_empty() && self.test.is_empty()
  }
}

/// A namespaced, versioned, typed unit of source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
  pub namespace: String,
  pub name: String,
  pub version: String,
  /// Selects which build step applies (e.g. `go`, `java`).
  #[serde(rename = "type")]
  pub package_type: String,
  #[serde(default)]
  pub dependencies: Dependencies,
}

impl Package {
  pub fn new(id: PackageId, package_type: impl Into<String>, dependencies: Dependencies) -> Self {
    Self {
      namespace: id.namespace,
      name: id.name,
      version: id.version,
      package_type: package_type.into(),
      dependencies,
    }
  }

  pub fn id(&self) -> PackageId {
    PackageId::new(&self.namespace, &self.name, &self.version)
  }
}

impl fmt::Display for Package {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}-{}", self.namespace, self.name, self.version)
  }
}

/// The persisted key of an artifact. Stable across process restarts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
  pub namespace: String,
  pub name: String,
  pub version: String,
  pub build_number: String,
}

impl fmt::Display for ArtifactKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}/{}-{}#{}",
      self.namespace, self.name, self.version, self.build_number
    )
  }
}

/// A single build of a package.
///
/// The build number must be unique across all builds of the same package.
/// Two artifacts with the same package identity and build number denote the
/// same physical output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
  pub package: Package,
  pub build_number: String,
}

impl Artifact {
  pub fn new(package: Package, build_number: impl Into<String>) -> Self {
    Self {
      package,
      build_number: build_number.into(),
    }
  }

  pub fn package_id(&self) -> PackageId {
    self.package.id()
  }

  pub fn key(&self) -> ArtifactKey {
    ArtifactKey {
      namespace: self.package.namespace.clone(),
      name: self.package.name.clone(),
      version: self.package.version.clone(),
      build_number: self.build_number.clone(),
    }
  }
}

impl fmt::Display for Artifact {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.package, self.build_number)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn package_display_matches_identity() {
    let pkg = Package::new(PackageId::new("acme", "core", "1.0"), "go", Dependencies::default());
    assert_eq!(pkg.to_string(), "acme/core-1.0");
    assert_eq!(pkg.id().to_string(), "acme/core-1.0");
  }

  #[test]
  fn package_id_orders_by_namespace_then_name_then_version() {
    let mut ids = vec![
      PackageId::new("b", "a", "1"),
      PackageId::new("a", "b", "1"),
      PackageId::new("a", "a", "2"),
      PackageId::new("a", "a", "1"),
    ];
    ids.sort();
    let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
    assert_eq!(rendered, vec!["a/a-1", "a/a-2", "a/b-1", "b/a-1"]);
  }

  #[test]
  fn parse_package_id_with_dashed_name() {
    let id: PackageId = "acme/my-lib-2.1.0".parse().unwrap();
    assert_eq!(id, PackageId::new("acme", "my-lib", "2.1.0"));
  }

  #[test]
  fn parse_package_id_rejects_malformed() {
    assert!("acme".parse::<PackageId>().is_err());
    assert!("acme/core".parse::<PackageId>().is_err());
    assert!("/core-1".parse::<PackageId>().is_err());
    assert!("acme/core-".parse::<PackageId>().is_err());
    assert!("acme/x/core-1".parse::<PackageId>().is_err());
  }

  #[test]
  fn all_dependencies_are_compile_then_test() {
    let deps = Dependencies {
      compile: vec![PackageId::new("a", "c1", "1"), PackageId::new("a", "c2", "1")],
      test: vec![PackageId::new("a", "t1", "1")],
    };
    let names: Vec<String> = deps.all().into_iter().map(|id| id.name).collect();
    assert_eq!(names, vec!["c1", "c2", "t1"]);

    let kinds: Vec<DependencyKind> = deps.iter_kinds().map(|(_, kind)| kind).collect();
    assert_eq!(
      kinds,
      vec![DependencyKind::Compile, DependencyKind::Compile, DependencyKind::Test]
    );
  }

  #[test]
  fn artifact_key_and_display() {
    let pkg = Package::new(PackageId::new("acme", "core", "1.0"), "go", Dependencies::default());
    let artifact = Artifact::new(pkg, "42");
    assert_eq!(artifact.to_string(), "acme/core-1.0#42");
    assert_eq!(artifact.key().to_string(), "acme/core-1.0#42");
    assert_eq!(artifact.package_id(), PackageId::new("acme", "core", "1.0"));
  }

  #[test]
  fn package_deserializes_type_field() {
    let json = r#"{"namespace":"acme","name":"core","version":"1.0","type":"go"}"#;
    let pkg: Package = serde_json::from_str(json).unwrap();
    assert_eq!(pkg.package_type, "go");
    assert!(pkg.dependencies.is_empty());
  }
}
