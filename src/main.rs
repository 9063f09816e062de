mod badge;
mod cache;
mod commands;
mod config;
mod engine;
mod error;
mod event;
mod profile;
mod redmine;
mod scheduler;
#[cfg(test)]
mod test_support;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::SqliteStorage;
use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(name = "redmine-sync")]
#[command(about = "Keeps a local cache of your Redmine issues and tells you what changed")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/redmine-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let db_path = config.storage.resolve_path()?;
  let _log_guard = init_logging(config.log.directory.as_deref(), &db_path);

  let storage = Arc::new(SqliteStorage::open(&db_path)?);
  tracing::debug!(path = %db_path.display(), "cache opened");
  let engine = engine::Engine::new(&config, storage)?;

  commands::run(args.command, &engine, &config).await
}

/// Log to a daily rolling file, next to the database unless configured
/// otherwise. Falls back to stderr when the directory is unusable. The
/// returned guard flushes the file writer on drop.
fn init_logging(directory: Option<&Path>, db_path: &Path) -> Option<WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("redmine_sync=info"));

  let logs_dir = directory
    .map(Path::to_path_buf)
    .or_else(|| db_path.parent().map(|dir| dir.join("logs")));
  let logs_dir = logs_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok());

  let Some(logs_dir) = logs_dir else {
    tracing_subscriber::registry()
      .with(filter)
      .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
      .init();
    return None;
  };

  let file_appender = tracing_appender::rolling::daily(&logs_dir, "redmine-sync.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);
  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();
  Some(guard)
}
