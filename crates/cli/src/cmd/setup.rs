use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use zbuild_lib::store::{ArtifactStore, LocalStore};

use super::{load_config, store_root};
use crate::output::{Mark, OutputFormat, announce, print_json};

pub fn cmd_setup(root: &Path, store: Option<PathBuf>, format: OutputFormat) -> Result<()> {
  let config = load_config(root)?;
  let store_path = store_root(store, &config)?;
  let store = LocalStore::new(&store_path);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(store.setup())
    .with_context(|| format!("Failed to set up artifact store at {}", store_path.display()))?;

  if format.is_json() {
    print_json(&json!({ "store": store_path }))
  } else {
    announce(Mark::Done, &format!("Artifact store ready at {}", store_path.display()));
    Ok(())
  }
}
