//! Workspace configuration (`zbuild.toml`).
//!
//! ```toml
//! [store]
//! path = "/var/lib/zbuild"
//!
//! [build]
//! parallelism = 8
//! shell = "/bin/bash"
//!
//! [types.rust]
//! command = "cargo build --release && cp target/release/app \"$ZBUILD_BUILD_DIR\""
//! ```
//!
//! A missing file yields the defaults.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::CONFIG_FILENAME;

#[derive(Debug, Error)]
pub enum ConfigError {
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
    source: toml::de::Error,
  },

  #[error("invalid configuration in {path}: {reason}")]
  Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
  pub store: StoreConfig,
  pub build: BuildConfig,
  /// Build command per package type.
  pub types: BTreeMap<String, TypeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
  /// Artifact store root. Relative paths are resolved against the workspace root.
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
  pub parallelism: Option<usize>,
  pub shell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeConfig {
  pub command: String,
}

impl WorkspaceConfig {
  /// Load `zbuild.toml` from the workspace root, or defaults if absent.
  pub fn load(root: &Path) -> Result<Self, ConfigError> {
    let path = root.join(CONFIG_FILENAME);
    let contents = match std::fs::read_to_string(&path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no workspace config, using defaults");
        return Ok(Self::default());
      }
      Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let mut config: WorkspaceConfig = match toml::from_str(&contents) {
      Ok(config) => config,
      Err(source) => return Err(ConfigError::Parse { path, source }),
    };

    if config.build.parallelism == Some(0) {
      return Err(ConfigError::Invalid {
        path,
        reason: "build.parallelism must be at least 1".to_string(),
      });
    }

    if let Some(store) = config.store.path.take() {
      config.store.path = Some(if store.is_relative() { root.join(store) } else { store });
    }

    debug!(path = %path.display(), types = config.types.len(), "loaded workspace config");
    Ok(config)
  }

  pub fn command_for(&self, package_type: &str) -> Option<&str> {
    self.types.get(package_type).map(|t| t.command.as_str())
  }
}
