//! Shell command build step.
//!
//! Runs a configured command in a package's working directory and packs the
//! package's `build/` directory into a gzip tarball as the artifact contents.
//! Input artifacts are unpacked under `.zbuild/deps/<namespace>/<name>-<version>`
//! (compile closure) and `.zbuild/test-deps/...` (test inputs) before the
//! command runs.

use std::collections::BTreeMap;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::BoxError;
use crate::consts::{BUILD_DIR, SCRATCH_DIR};
use crate::model::{Artifact, PackageId};
use crate::store::{ArtifactStore, StoreError};

use super::step::{ArtifactContents, BuildContext, BuildStep};

/// Errors raised by [`CommandBuildStep`].
#[derive(Debug, Error)]
pub enum CommandError {
  /// No working directory is known for the package.
  #[error("no working directory known for {0}")]
  UnknownWorkdir(PackageId),

  /// Command exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  /// Reading an input artifact failed.
  #[error("failed to read input {artifact}: {source}")]
  Input {
    artifact: String,
    #[source]
    source: StoreError,
  },

  /// I/O error while preparing, running or packing the build.
  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Build step that runs a shell command per package.
#[derive(Debug, Clone)]
pub struct CommandBuildStep {
  command: String,
  shell: Option<String>,
  workdirs: Arc<BTreeMap<PackageId, PathBuf>>,
}

impl CommandBuildStep {
  /// `workdirs` maps each buildable package to the directory holding its build file.
  pub fn new(command: impl Into<String>, workdirs: BTreeMap<PackageId, PathBuf>) -> Self {
    Self {
      command: command.into(),
      shell: None,
      workdirs: Arc::new(workdirs),
    }
  }

  /// Use a specific shell instead of the platform default.
  pub fn with_shell(mut self, shell: Option<String>) -> Self {
    self.shell = shell;
    self
  }

  pub fn command(&self) -> &str {
    &self.command
  }
}

#[async_trait]
impl BuildStep for CommandBuildStep {
  async fn build(&self, ctx: &BuildContext) -> Result<ArtifactContents, BoxError> {
    let id = ctx.package_id();
    let workdir = self
      .workdirs
      .get(&id)
      .ok_or_else(|| CommandError::UnknownWorkdir(id.clone()))?;

    let build_dir = workdir.join(BUILD_DIR);
    let deps_dir = workdir.join(SCRATCH_DIR).join("deps");
    let test_deps_dir = workdir.join(SCRATCH_DIR).join("test-deps");

    for dir in [&build_dir, &deps_dir, &test_deps_dir] {
      reset_dir(dir).await?;
    }

    unpack_inputs(&ctx.inputs.compile, ctx.store.as_ref(), &deps_dir).await?;
    unpack_inputs(&ctx.inputs.test, ctx.store.as_ref(), &test_deps_dir).await?;

    let env = [
      ("ZBUILD_PACKAGE", id.to_string()),
      ("ZBUILD_NAMESPACE", id.namespace.clone()),
      ("ZBUILD_NAME", id.name.clone()),
      ("ZBUILD_VERSION", id.version.clone()),
      ("ZBUILD_BUILD_NUMBER", ctx.artifact.build_number.clone()),
      ("ZBUILD_BUILD_DIR", build_dir.display().to_string()),
      ("ZBUILD_DEPS_DIR", deps_dir.display().to_string()),
      ("ZBUILD_TEST_DEPS_DIR", test_deps_dir.display().to_string()),
    ];

    run_command(&self.command, self.shell.as_deref(), workdir, &env).await?;

    let archive = pack_dir(build_dir).await?;
    debug!(package = %id, bytes = archive.len(), "packed build output");

    Ok(Box::new(Cursor::new(archive)))
  }
}

async fn reset_dir(dir: &Path) -> Result<(), CommandError> {
  let io_err = |source| CommandError::Io {
    path: dir.to_path_buf(),
    source,
  };

  match tokio::fs::remove_dir_all(dir).await {
    Ok(()) => {}
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => return Err(io_err(e)),
  }
  tokio::fs::create_dir_all(dir).await.map_err(io_err)
}

async fn unpack_inputs(inputs: &[Artifact], store: &dyn ArtifactStore, dest_root: &Path) -> Result<(), CommandError> {
  for artifact in inputs {
    let mut reader = store.open_reader(artifact).await.map_err(|source| CommandError::Input {
      artifact: artifact.to_string(),
      source,
    })?;

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await.map_err(|source| CommandError::Input {
      artifact: artifact.to_string(),
      source: StoreError::Io {
        path: dest_root.to_path_buf(),
        source,
      },
    })?;

    let dest = dest_root
      .join(&artifact.package.namespace)
      .join(format!("{}-{}", artifact.package.name, artifact.package.version));
    debug!(input = %artifact, dest = %dest.display(), "unpacking input artifact");

    unpack_archive(bytes, dest).await?;
  }

  Ok(())
}

/// Execute the build command.
///
/// The environment is inherited, with the `ZBUILD_*` variables added.
async fn run_command(
  cmd: &str,
  shell: Option<&str>,
  workdir: &Path,
  env: &[(&str, String)],
) -> Result<(), CommandError> {
  info!(cmd = %cmd, workdir = %workdir.display(), "executing build command");

  let (shell_cmd, shell_args) = get_shell(shell);

  let mut command = Command::new(&shell_cmd);
  command.args(&shell_args).arg(cmd).current_dir(workdir);
  for (key, value) in env {
    command.env(key, value);
  }

  let output = command.output().await.map_err(|source| CommandError::Io {
    path: workdir.to_path_buf(),
    source,
  })?;

  let stdout = String::from_utf8_lossy(&output.stdout);
  if !stdout.trim().is_empty() {
    debug!(stdout = %stdout.trim(), "command output");
  }

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    return Err(CommandError::Failed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      stderr,
    });
  }

  Ok(())
}

/// Get the shell command and arguments for the current platform.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

/// Pack a directory into a gzip tarball.
async fn pack_dir(dir: PathBuf) -> Result<Vec<u8>, CommandError> {
  let path = dir.clone();
  tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", &dir)?;
    builder.into_inner()?.finish()
  })
  .await
  .map_err(io::Error::other)
  .and_then(|packed| packed)
  .map_err(|source| CommandError::Io { path, source })
}

/// Unpack a gzip tarball into `dest`.
async fn unpack_archive(bytes: Vec<u8>, dest: PathBuf) -> Result<(), CommandError> {
  let path = dest.clone();
  tokio::task::spawn_blocking(move || -> io::Result<()> {
    std::fs::create_dir_all(&dest)?;
    tar::Archive::new(GzDecoder::new(bytes.as_slice())).unpack(&dest)
  })
  .await
  .map_err(io::Error::other)
  .and_then(|unpacked| unpacked)
  .map_err(|source| CommandError::Io { path, source })
}
