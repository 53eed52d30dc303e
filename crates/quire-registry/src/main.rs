//! quire-admin: maintenance commands for a quire store.
//!
//! Reads `quire.toml` (or the path given with `--config`) plus `QUIRE_*`
//! environment variables, opens the configured store and runs one command.
//! Only the SQLite backend can be administered from here; a remote backend
//! needs the host process's connector.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use quire_core::folder::PathIssue;
use quire_registry::{Registry, StoreConfig};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "quire store administration")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create the database and its tables if they do not exist.
  Init,
  /// Print the number of records in every collection.
  Stats,
  /// Compare stored folder paths with their parent chains.
  CheckPaths {
    /// Rewrite stale paths.
    #[arg(long)]
    repair: bool,
    /// Only check this owner's folders.
    #[arg(long)]
    owner:  Option<String>,
  },
  /// Read or write an installation setting.
  Setting {
    #[command(subcommand)]
    action: SettingAction,
  },
}

#[derive(Subcommand)]
enum SettingAction {
  Get { key: String },
  Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let config = StoreConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
  let registry = Registry::open(&config, None)
    .await
    .context("failed to open store")?;

  match cli.command {
    Command::Init => {
      println!("store ready ({})", registry.backend().name());
    }

    Command::Stats => {
      for (collection, count) in registry.counts().await.context("failed to count records")? {
        println!("{collection:<18} {count}");
      }
    }

    Command::CheckPaths { repair, owner } => {
      let folders = registry.folders();
      if repair {
        let (repaired, broken) = folders
          .repair_paths(owner.as_deref())
          .await
          .context("failed to repair folder paths")?;
        println!("repaired {repaired} folder paths");
        report(&broken);
        if !broken.is_empty() {
          anyhow::bail!("{} folders have broken parent chains", broken.len());
        }
      } else {
        let issues = folders
          .verify_paths(owner.as_deref())
          .await
          .context("failed to check folder paths")?;
        report(&issues);
        if !issues.is_empty() {
          anyhow::bail!("{} folder paths need attention (run with --repair)", issues.len());
        }
        println!("all folder paths are consistent");
      }
    }

    Command::Setting { action: SettingAction::Get { key } } => {
      let value = registry
        .settings()
        .get(&key)
        .await
        .with_context(|| format!("failed to read setting {key:?}"))?
        .with_context(|| format!("setting {key:?} is not set"))?;
      println!("{value}");
    }

    Command::Setting { action: SettingAction::Set { key, value } } => {
      registry
        .settings()
        .set(&key, &value)
        .await
        .with_context(|| format!("failed to write setting {key:?}"))?;
      tracing::info!(key = %key, "setting updated");
    }
  }

  Ok(())
}

fn report(issues: &[PathIssue]) {
  for issue in issues {
    match issue {
      PathIssue::Stale { folder_id, stored, expected } => {
        println!("{folder_id}: stored {stored:?}, expected {expected:?}");
      }
      PathIssue::Broken { folder_id, reason } => println!("{folder_id}: {reason}"),
    }
  }
}
