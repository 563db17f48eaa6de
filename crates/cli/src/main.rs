//! bibdex - bibliographic record indexer for Solr

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod commands;
mod logging;

use commands::{App, cmd_check_index, cmd_count_values, cmd_update};
use bibdex_indexer::RunOutcome;
use logging::{init_file_logging, init_logging};

#[derive(Parser)]
#[command(name = "bibdex")]
#[command(about = "Bibliographic record indexer for Solr")]
struct Cli {
  /// Main configuration file
  #[arg(long, default_value = "bibdex.toml")]
  config: PathBuf,
  /// Data source settings file
  #[arg(long)]
  datasources: Option<PathBuf>,
  /// Record export to load into the store (JSON lines)
  #[arg(long)]
  records: Option<PathBuf>,
  /// Dedup group export to load into the store (JSON lines)
  #[arg(long)]
  dedups: Option<PathBuf>,
  /// Directory for a daily-rolling log file (console-only when unset)
  #[arg(long)]
  log_dir: Option<PathBuf>,
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Update the search index with changed records
  Update {
    /// Index records changed since this date (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,
    /// Comma-separated source ids; `-` prefix excludes, `-/regex/` excludes by pattern
    #[arg(long)]
    source: Option<String>,
    /// Index a single record by id
    #[arg(long)]
    single: Option<String>,
    /// Skip all commits
    #[arg(long)]
    no_commit: bool,
    /// Delete the selected sources from the index
    #[arg(long)]
    delete: bool,
    /// Diff against the live index instead of updating; file path or `-`
    #[arg(long, value_name = "PATH")]
    compare: Option<String>,
    /// Write update batches to `<prefix>-<N>.json` instead of posting them
    #[arg(long, value_name = "PATH")]
    dump_prefix: Option<PathBuf>,
    /// Keep a separate checkpoint per update URL
    #[arg(long)]
    date_per_server: bool,
  },
  /// Count the values of a field across records
  CountValues {
    #[arg(long)]
    field: String,
    /// Restrict to one source
    #[arg(long)]
    source: Option<String>,
    /// Count fully mapped documents instead of raw parser output
    #[arg(long)]
    mapped: bool,
  },
  /// Delete index entries whose records no longer exist in the store
  CheckIndex,
}

#[tokio::main]
async fn main() {
  std::process::exit(run().await);
}

async fn run() -> i32 {
  let cli = Cli::parse();
  let _guard = match &cli.log_dir {
    Some(dir) => init_file_logging(dir),
    None => {
      init_logging();
      None
    }
  };

  let cancel = CancellationToken::new();
  let signal_cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("Interrupt received, finishing in-flight work");
      signal_cancel.cancel();
    }
  });

  let app = match App::new(
    &cli.config,
    cli.datasources.as_deref(),
    cli.records.as_deref(),
    cli.dedups.as_deref(),
    cancel,
  ) {
    Ok(app) => app,
    Err(e) => {
      error!(err = %e, "Startup failed");
      return 2;
    }
  };

  let result = match cli.command {
    Commands::Update {
      from,
      source,
      single,
      no_commit,
      delete,
      compare,
      dump_prefix,
      date_per_server,
    } => {
      cmd_update(
        &app,
        from,
        source,
        single,
        no_commit,
        delete,
        compare,
        dump_prefix,
        date_per_server,
      )
      .await
    }
    Commands::CountValues { field, source, mapped } => cmd_count_values(&app, source, field, mapped).await,
    Commands::CheckIndex => cmd_check_index(&app).await,
  };

  match result {
    Ok(RunOutcome::Completed { .. }) => 0,
    Ok(RunOutcome::Interrupted) => 1,
    Err(e) => {
      error!(err = %e, "Run failed");
      2
    }
  }
}
