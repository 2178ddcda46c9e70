use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use super::{BuildfileError, ParsedBuildfile, parse_buildfile};
use crate::BoxError;
use crate::consts::{BUILD_DIR, BUILDFILE_NAME};
use crate::graph::PackageLookup;
use crate::model::{Package, PackageId};

/// Directories never searched for build files.
const SKIPPED_DIRS: &[&str] = &[BUILD_DIR, "target"];

/// All packages declared under a workspace root.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
  root: PathBuf,
  packages: BTreeMap<PackageId, ParsedBuildfile>,
}

impl Workspace {
  /// Find and parse every `build.yaml` below `root`.
  ///
  /// Output (`build/`), `target/` and hidden directories are not searched.
  pub fn discover(root: &Path) -> Result<Self, BuildfileError> {
    let root = std::path::absolute(root).map_err(|source| BuildfileError::Read {
      path: root.to_path_buf(),
      source,
    })?;
    info!(root = %root.display(), "discovering packages");

    let mut packages: BTreeMap<PackageId, ParsedBuildfile> = BTreeMap::new();
    let walker = WalkDir::new(&root)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));

    for entry in walker {
      let entry = entry.map_err(|source| BuildfileError::Walk {
        path: source.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone()),
        source,
      })?;
      if !entry.file_type().is_file() || entry.file_name() != BUILDFILE_NAME {
        continue;
      }

      let parsed = parse_buildfile(entry.path())?;
      let id = parsed.id();
      if let Some(existing) = packages.get(&id) {
        return Err(BuildfileError::DuplicatePackage {
          id,
          first: existing.working_dir.clone(),
          second: parsed.working_dir,
        });
      }
      debug!(package = %id, dir = %parsed.working_dir.display(), "found package");
      packages.insert(id, parsed);
    }

    info!(count = packages.len(), "discovered packages");
    Ok(Self { root, packages })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn len(&self) -> usize {
    self.packages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.packages.is_empty()
  }

  pub fn get(&self, id: &PackageId) -> Option<&ParsedBuildfile> {
    self.packages.get(id)
  }

  /// Every declared package, in identity order.
  pub fn packages(&self) -> impl Iterator<Item = &Package> {
    self.packages.values().map(ParsedBuildfile::package)
  }

  pub fn package_dir(&self, id: &PackageId) -> Option<&Path> {
    self.packages.get(id).map(|p| p.working_dir.as_path())
  }

  /// Working directory of every package, for command build steps.
  pub fn workdirs(&self) -> BTreeMap<PackageId, PathBuf> {
    self
      .packages
      .iter()
      .map(|(id, parsed)| (id.clone(), parsed.working_dir.clone()))
      .collect()
  }
}

impl PackageLookup for Workspace {
  fn lookup(&self, reference: &PackageId) -> Result<Option<Package>, BoxError> {
    Ok(self.packages.get(reference).map(|p| p.package().clone()))
  }
}

fn is_skipped(entry: &DirEntry) -> bool {
  if !entry.file_type().is_dir() {
    return false;
  }
  let name = entry.file_name().to_string_lossy();
  name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}
