mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::{BuildArgs, FetchArgs, cmd_build, cmd_fetch, cmd_plan, cmd_setup};
use crate::output::{Mark, OutputFormat, announce};

/// zb - dependency-ordered package builds
#[derive(Parser)]
#[command(name = "zb")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Workspace root to discover build files under
  #[arg(short = 'C', long, global = true, default_value = ".")]
  workspace: PathBuf,

  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Output format
  #[arg(long, global = true, value_enum, default_value = "text")]
  format: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show the build groups in execution order
  Plan {
    /// Only plan this package and its dependencies (namespace/name-version)
    #[arg(short, long)]
    package: Option<String>,
  },

  /// Build packages in dependency order and store their artifacts
  Build(BuildArgs),

  /// Prepare the artifact store
  Setup {
    /// Artifact store directory
    #[arg(long)]
    store: Option<PathBuf>,
  },

  /// Read a stored artifact
  Fetch(FetchArgs),
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match run(cli) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(err) => {
      announce(Mark::Failed, &format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<bool> {
  match cli.command {
    Commands::Plan { package } => cmd_plan(&cli.workspace, package.as_deref(), cli.format).map(|_| true),
    Commands::Build(args) => cmd_build(&cli.workspace, args, cli.format),
    Commands::Setup { store } => cmd_setup(&cli.workspace, store, cli.format).map(|_| true),
    Commands::Fetch(args) => cmd_fetch(&cli.workspace, args).map(|_| true),
  }
}

fn init_tracing(verbose: u8) {
  let default_level = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
