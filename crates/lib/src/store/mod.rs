//! Artifact storage.
//!
//! The orchestrator writes build output through the [`ArtifactStore`]
//! contract and never depends on a particular backend. Two backends ship
//! with the crate:
//! - [`LocalStore`]: files under a root directory
//! - [`MemoryStore`]: an in-process map, for tests and dry runs
//!
//! # Write conflicts
//!
//! Every backend follows the same policy: the first writer to commit an
//! artifact wins. Any other writer for the same `(package, build number)`
//! fails with [`StoreError::ArtifactAlreadyExists`], either when it is opened
//! (if the artifact is already durable) or when it commits. Committed
//! artifacts are never overwritten.

mod local;
mod memory;

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::model::{Artifact, ArtifactKey};

pub use local::LocalStore;
pub use memory::MemoryStore;

/// A stream of stored artifact bytes.
pub type ArtifactReader = Box<dyn AsyncRead + Send + Unpin>;

/// Errors returned by artifact store backends.
#[derive(Debug, Error)]
pub enum StoreError {
  /// Another writer already committed this artifact.
  #[error("artifact already exists: {0}")]
  ArtifactAlreadyExists(ArtifactKey),

  /// No writer has committed this artifact.
  #[error("artifact not found: {0}")]
  ArtifactNotFound(ArtifactKey),

  /// A key component cannot be stored safely (empty, path separator, ...).
  #[error("invalid artifact key {key}: {reason}")]
  InvalidKey { key: ArtifactKey, reason: String },

  /// The writer was already committed.
  #[error("writer for {0} is already closed")]
  WriterClosed(ArtifactKey),

  /// I/O error in the backing storage.
  #[error("store io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl StoreError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    StoreError::Io {
      path: path.into(),
      source,
    }
  }
}

/// A pending artifact write.
///
/// Bytes written are not visible to readers until [`commit`](Self::commit)
/// succeeds. Dropping a writer without committing discards everything written.
#[async_trait]
pub trait ArtifactWriter: AsyncWrite + Send + Unpin {
  /// Make the written bytes durably retrievable by the artifact's identity.
  async fn commit(&mut self) -> Result<(), StoreError>;
}

/// Backend-independent artifact storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
  /// Create backing structures if they are absent.
  ///
  /// Idempotent: safe to call on every start.
  async fn setup(&self) -> Result<(), StoreError>;

  /// Open a writer for an artifact that has not been stored yet.
  async fn open_writer(&self, artifact: &Artifact) -> Result<Box<dyn ArtifactWriter>, StoreError>;

  /// Open a reader for a committed artifact.
  ///
  /// Fails with [`StoreError::ArtifactNotFound`] if no writer has committed it.
  async fn open_reader(&self, artifact: &Artifact) -> Result<ArtifactReader, StoreError>;

  /// Whether a committed artifact exists.
  async fn exists(&self, artifact: &Artifact) -> Result<bool, StoreError>;
}

/// Reject key components that cannot be used as a single path segment.
pub(crate) fn validate_key(key: &ArtifactKey) -> Result<(), StoreError> {
  let components = [
    ("namespace", &key.namespace),
    ("name", &key.name),
    ("version", &key.version),
    ("build number", &key.build_number),
  ];

  for (label, value) in components {
    let reason = if value.is_empty() {
      Some(format!("{label} is empty"))
    } else if value.starts_with('.') {
      Some(format!("{label} starts with '.'"))
    } else if value.contains(['/', '\\', '\0']) {
      Some(format!("{label} contains a path separator"))
    } else {
      None
    };

    if let Some(reason) = reason {
      return Err(StoreError::InvalidKey {
        key: key.clone(),
        reason,
      });
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(build_number: &str) -> ArtifactKey {
    ArtifactKey {
      namespace: "acme".to_string(),
      name: "core".to_string(),
      version: "1.0".to_string(),
      build_number: build_number.to_string(),
    }
  }

  #[test]
  fn valid_key_passes() {
    assert!(validate_key(&key("20240101120000000")).is_ok());
  }

  #[test]
  fn invalid_keys_are_rejected() {
    for bad in ["", "..", ".hidden", "a/b", "a\\b"] {
      let err = validate_key(&key(bad)).unwrap_err();
      assert!(matches!(err, StoreError::InvalidKey { .. }), "accepted {bad:?}");
    }
  }
}
