//! In-memory artifact store.

use std::collections::BTreeMap;
use std::io;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::{ArtifactReader, ArtifactStore, ArtifactWriter, StoreError, validate_key};
use crate::model::{Artifact, ArtifactKey};

type Entries = Arc<Mutex<BTreeMap<ArtifactKey, Arc<Vec<u8>>>>>;

/// Artifact store that keeps committed artifacts in memory.
///
/// Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  entries: Entries,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Keys of all committed artifacts, in key order.
  pub fn keys(&self) -> Vec<ArtifactKey> {
    lock(&self.entries).keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    lock(&self.entries).len()
  }

  pub fn is_empty(&self) -> bool {
    lock(&self.entries).is_empty()
  }

  /// Committed bytes for an artifact, if any.
  pub fn get(&self, artifact: &Artifact) -> Option<Arc<Vec<u8>>> {
    lock(&self.entries).get(&artifact.key()).cloned()
  }
}

fn lock(entries: &Entries) -> MutexGuard<'_, BTreeMap<ArtifactKey, Arc<Vec<u8>>>> {
  entries.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ArtifactStore for MemoryStore {
  async fn setup(&self) -> Result<(), StoreError> {
    Ok(())
  }

  async fn open_writer(&self, artifact: &Artifact) -> Result<Box<dyn ArtifactWriter>, StoreError> {
    let key = artifact.key();
    validate_key(&key)?;

    if lock(&self.entries).contains_key(&key) {
      return Err(StoreError::ArtifactAlreadyExists(key));
    }

    Ok(Box::new(MemoryWriter {
      key,
      buffer: Some(Vec::new()),
      entries: self.entries.clone(),
    }))
  }

  async fn open_reader(&self, artifact: &Artifact) -> Result<ArtifactReader, StoreError> {
    let key = artifact.key();
    let bytes = lock(&self.entries)
      .get(&key)
      .cloned()
      .ok_or(StoreError::ArtifactNotFound(key))?;

    Ok(Box::new(Cursor::new(bytes.as_ref().clone())))
  }

  async fn exists(&self, artifact: &Artifact) -> Result<bool, StoreError> {
    Ok(lock(&self.entries).contains_key(&artifact.key()))
  }
}

struct MemoryWriter {
  key: ArtifactKey,
  buffer: Option<Vec<u8>>,
  entries: Entries,
}

impl AsyncWrite for MemoryWriter {
  fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    match self.get_mut().buffer.as_mut() {
      Some(buffer) => {
        buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
      }
      None => Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer already committed"))),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Poll::Ready(Ok(()))
  }

  fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Poll::Ready(Ok(()))
  }
}

#[async_trait]
impl ArtifactWriter for MemoryWriter {
  async fn commit(&mut self) -> Result<(), StoreError> {
    let buffer = self
      .buffer
      .take()
      .ok_or_else(|| StoreError::WriterClosed(self.key.clone()))?;

    let mut entries = lock(&self.entries);
    if entries.contains_key(&self.key) {
      return Err(StoreError::ArtifactAlreadyExists(self.key.clone()));
    }
    entries.insert(self.key.clone(), Arc::new(buffer));
    Ok(())
  }
}
