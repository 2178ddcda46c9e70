//! Filesystem artifact store.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! └── <namespace>/
//!     └── <name>/
//!         └── <version>/
//!             ├── <build_number>          # committed artifact
//!             └── .incoming-XXXXXX        # in-flight write
//! ```
//!
//! Writes land in a temporary file next to their destination and are
//! published with an atomic rename that refuses to replace an existing file.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::AsyncWrite;
use tracing::debug;

use super::{ArtifactReader, ArtifactStore, ArtifactWriter, StoreError, validate_key};
use crate::model::{Artifact, ArtifactKey};

const INCOMING_PREFIX: &str = ".incoming-";

/// Artifact store backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
  root: PathBuf,
}

impl LocalStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Path a committed artifact lives at.
  pub fn artifact_path(&self, key: &ArtifactKey) -> Result<PathBuf, StoreError> {
    validate_key(key)?;
    Ok(
      self
        .root
        .join(&key.namespace)
        .join(&key.name)
        .join(&key.version)
        .join(&key.build_number),
    )
  }
}

#[async_trait]
impl ArtifactStore for LocalStore {
  async fn setup(&self) -> Result<(), StoreError> {
    fs::create_dir_all(&self.root)
      .await
      .map_err(|e| StoreError::io(&self.root, e))?;
    debug!(root = %self.root.display(), "local artifact store ready");
    Ok(())
  }

  async fn open_writer(&self, artifact: &Artifact) -> Result<Box<dyn ArtifactWriter>, StoreError> {
    let key = artifact.key();
    let dest = self.artifact_path(&key)?;

    if fs::try_exists(&dest).await.map_err(|e| StoreError::io(&dest, e))? {
      return Err(StoreError::ArtifactAlreadyExists(key));
    }

    let parent = dest.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
    fs::create_dir_all(&parent)
      .await
      .map_err(|e| StoreError::io(&parent, e))?;

    let temp = tempfile::Builder::new()
      .prefix(INCOMING_PREFIX)
      .tempfile_in(&parent)
      .map_err(|e| StoreError::io(&parent, e))?;
    let (file, temp_path) = temp.into_parts();

    debug!(artifact = %key, path = %dest.display(), "opened artifact writer");

    Ok(Box::new(LocalWriter {
      key,
      dest,
      file: Some(File::from_std(file)),
      temp_path: Some(temp_path),
    }))
  }

  async fn open_reader(&self, artifact: &Artifact) -> Result<ArtifactReader, StoreError> {
    let key = artifact.key();
    let path = self.artifact_path(&key)?;

    match File::open(&path).await {
      Ok(file) => Ok(Box::new(file)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::ArtifactNotFound(key)),
      Err(e) => Err(StoreError::io(path, e)),
    }
  }

  async fn exists(&self, artifact: &Artifact) -> Result<bool, StoreError> {
    let path = self.artifact_path(&artifact.key())?;
    fs::try_exists(&path).await.map_err(|e| StoreError::io(path, e))
  }
}

/// In-flight write to a [`LocalStore`].
///
/// The temporary file is deleted when the writer is dropped uncommitted.
/// Committing closes the file handle, so a published artifact cannot be
/// written through the writer again.
struct LocalWriter {
  key: ArtifactKey,
  dest: PathBuf,
  file: Option<File>,
  temp_path: Option<TempPath>,
}

impl LocalWriter {
  fn open_file(&mut self) -> io::Result<Pin<&mut File>> {
    match self.file.as_mut() {
      Some(file) => Ok(Pin::new(file)),
      None => Err(io::Error::new(
        io::ErrorKind::BrokenPipe,
        StoreError::WriterClosed(self.key.clone()),
      )),
    }
  }
}

impl AsyncWrite for LocalWriter {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    match self.get_mut().open_file() {
      Ok(file) => file.poll_write(cx, buf),
      Err(e) => Poll::Ready(Err(e)),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut().open_file() {
      Ok(file) => file.poll_flush(cx),
      Err(e) => Poll::Ready(Err(e)),
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut().open_file() {
      Ok(file) => file.poll_shutdown(cx),
      Err(e) => Poll::Ready(Err(e)),
    }
  }
}

#[async_trait]
impl ArtifactWriter for LocalWriter {
  async fn commit(&mut self) -> Result<(), StoreError> {
    use tokio::io::AsyncWriteExt;

    let (Some(mut file), Some(temp_path)) = (self.file.take(), self.temp_path.take()) else {
      return Err(StoreError::WriterClosed(self.key.clone()));
    };

    file.flush().await.map_err(|e| StoreError::io(&*temp_path, e))?;
    file.sync_all().await.map_err(|e| StoreError::io(&*temp_path, e))?;
    drop(file);

    let dest = self.dest.clone();
    let persisted = tokio::task::spawn_blocking(move || temp_path.persist_noclobber(&dest))
      .await
      .map_err(|e| StoreError::io(&self.dest, io::Error::other(e)))?;

    match persisted {
      Ok(()) => {
        debug!(artifact = %self.key, "artifact committed");
        Ok(())
      }
      Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Err(StoreError::ArtifactAlreadyExists(self.key.clone())),
      Err(e) => Err(StoreError::io(&self.dest, e.error)),
    }
  }
}
