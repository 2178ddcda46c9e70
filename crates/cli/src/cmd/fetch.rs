use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::AsyncWriteExt;
use zbuild_lib::model::{Artifact, Dependencies, Package, PackageId};
use zbuild_lib::store::{ArtifactStore, LocalStore};

use super::{load_config, store_root};

#[derive(Args, Debug)]
pub struct FetchArgs {
  /// Package reference (namespace/name-version)
  pub package: String,

  /// Build number the artifact was stored under
  pub build_number: String,

  /// Write the artifact to this file instead of stdout
  #[arg(short, long)]
  pub output: Option<PathBuf>,

  /// Artifact store directory
  #[arg(long)]
  pub store: Option<PathBuf>,
}

pub fn cmd_fetch(root: &Path, args: FetchArgs) -> Result<()> {
  let config = load_config(root)?;
  let id: PackageId = args
    .package
    .parse()
    .with_context(|| format!("Invalid package reference: {}", args.package))?;

  // Artifacts are keyed by identity and build number only.
  let artifact = Artifact::new(Package::new(id, "", Dependencies::default()), args.build_number);
  let store = LocalStore::new(store_root(args.store, &config)?);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async {
    let mut reader = store
      .open_reader(&artifact)
      .await
      .with_context(|| format!("Failed to open artifact {}", artifact))?;

    match &args.output {
      Some(path) => {
        let mut file = tokio::fs::File::create(path)
          .await
          .with_context(|| format!("Failed to create {}", path.display()))?;
        tokio::io::copy(&mut reader, &mut file)
          .await
          .with_context(|| format!("Failed to write {}", path.display()))?;
        file.flush().await?;
      }
      None => {
        let mut stdout = tokio::io::stdout();
        tokio::io::copy(&mut reader, &mut stdout)
          .await
          .context("Failed to write artifact to stdout")?;
        stdout.flush().await?;
      }
    }

    anyhow::Ok(())
  })
}
