//! Build files.
//!
//! Every package is declared by a `build.yaml` in its working directory:
//!
//! ```yaml
//! namespace: acme
//! name: server
//! version: "2.1"
//! type: go
//! dependencies:
//!   compile:
//!     - { namespace: acme, name: proto, version: "1.0" }
//!   test:
//!     - { namespace: acme, name: fixtures, version: "1.0" }
//! ```
//!
//! Build output goes to `build/` next to the build file.

mod workspace;

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::BUILD_DIR;
use crate::model::{Package, PackageId};

pub use workspace::Workspace;

#[derive(Debug, Error)]
pub enum BuildfileError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid package in {path}: {reason}")]
  Invalid { path: PathBuf, reason: String },

  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("package {id} is declared twice: {first} and {second}")]
  DuplicatePackage { id: PackageId, first: PathBuf, second: PathBuf },
}

/// The contents of a build file: a single package declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Buildfile {
  pub package: Package,
}

/// A build file together with where it was found.
#[derive(Debug, Clone)]
pub struct ParsedBuildfile {
  pub buildfile: Buildfile,
  /// Absolute directory containing the build file.
  pub working_dir: PathBuf,
  /// `working_dir/build`.
  pub build_dir: PathBuf,
  /// The build file bytes as read.
  pub raw: Vec<u8>,
}

impl ParsedBuildfile {
  pub fn package(&self) -> &Package {
    &self.buildfile.package
  }

  pub fn id(&self) -> PackageId {
    self.buildfile.package.id()
  }
}

/// Read and parse the build file at `path`.
pub fn parse_buildfile(path: &Path) -> Result<ParsedBuildfile, BuildfileError> {
  debug!(path = %path.display(), "reading build file");

  let absolute = std::path::absolute(path).map_err(|source| BuildfileError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let raw = std::fs::read(&absolute).map_err(|source| BuildfileError::Read {
    path: absolute.clone(),
    source,
  })?;

  let buildfile: Buildfile = serde_yaml::from_slice(&raw).map_err(|source| BuildfileError::Parse {
    path: absolute.clone(),
    source,
  })?;

  validate(&buildfile.package).map_err(|reason| BuildfileError::Invalid {
    path: absolute.clone(),
    reason,
  })?;

  let working_dir = absolute.parent().map(Path::to_path_buf).unwrap_or_else(|| absolute.clone());
  let build_dir = working_dir.join(BUILD_DIR);

  debug!(path = %absolute.display(), package = %buildfile.package, "parsed build file");

  Ok(ParsedBuildfile {
    buildfile,
    working_dir,
    build_dir,
    raw,
  })
}

/// Identity components must round-trip through `namespace/name-version`.
fn validate(package: &Package) -> Result<(), String> {
  let check = |field: &str, value: &str| {
    if value.is_empty() {
      return Err(format!("{field} is empty"));
    }
    if value.contains('/') {
      return Err(format!("{field} '{value}' contains '/'"));
    }
    Ok(())
  };

  check("namespace", &package.namespace)?;
  check("name", &package.name)?;
  check("version", &package.version)?;
  check("type", &package.package_type)?;

  if package.version.contains('-') {
    return Err(format!("version '{}' contains '-'", package.version));
  }

  Ok(())
}
