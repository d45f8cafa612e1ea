mod cache;
mod commands;
mod config;
mod error;
mod logging;
mod xkcd;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::{eyre::WrapErr, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::cache::Index;
use crate::commands::{Target, UpdateOptions};
use crate::config::Config;
use crate::error::Error;
use crate::xkcd::XkcdClient;

#[derive(Parser, Debug)]
#[command(name = "xkcd")]
#[command(about = "xkcd in your terminal, backed by a searchable local index")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/xkcd/config.yaml)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Path to the index file (default: ~/.xkcd.index)
  #[arg(long, global = true)]
  index: Option<PathBuf>,

  /// Timeout of the whole command, in milliseconds
  #[arg(short, long, global = true)]
  timeout: Option<u64>,

  /// Verbose logging, repeat for more
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Use JSON for logs and output
  #[arg(short, long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Manage the local index
  Index {
    #[command(subcommand)]
    command: IndexCommand,
  },
  /// Show the informations of a comic
  #[command(visible_alias = "i")]
  Infos {
    /// `latest` or a comic number
    #[arg(default_value = "latest")]
    target: Target,
  },
  /// Write the image of a comic
  #[command(visible_alias = "s")]
  Show {
    /// `latest` or a comic number
    #[arg(default_value = "latest")]
    target: Target,

    /// Write the image to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Search indexed comics by title, alt text, transcript and news
  Search {
    query: String,

    #[arg(short, long, default_value_t = 20)]
    limit: usize,
  },
}

#[derive(Subcommand, Debug)]
enum IndexCommand {
  /// Create the index
  Init {
    /// Delete and recreate an existing index
    #[arg(short, long)]
    force: bool,

    /// Also store images, so comics can be shown without network
    #[arg(long)]
    offline: bool,
  },
  /// Update the index if it is outdated
  Update {
    /// Only check if the index should be updated, do not update it
    #[arg(short, long)]
    check: bool,

    /// Update even if the index is up to date
    #[arg(short, long)]
    force: bool,

    /// How many comics are fetched concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Re-synchronize starting at this comic number
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    from: Option<u32>,
  },
  /// Show the state of the index
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration, command line wins
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(index) = args.index {
    config.index_path = index;
  }
  if let Some(timeout) = args.timeout {
    config.timeout_ms = timeout;
  }

  let _guard = logging::init(args.verbose, args.json, config.log_file.as_deref())?;

  let deadline = Instant::now() + Duration::from_millis(config.timeout_ms);
  let mut index = Index::open(&config.index_path).wrap_err("Failed to open index")?;
  let client = XkcdClient::new(&config).wrap_err("Failed to create API client")?;

  let run = run(args.command, &config, &mut index, &client, args.json, deadline);
  let result = match tokio::time::timeout_at(deadline, run).await {
    Ok(result) => result,
    Err(_) => Err(Error::Timeout.into()),
  };

  if let Err(e) = index.close() {
    warn!(error = %e, "failed to close index");
  }
  result
}

async fn run(
  command: Command,
  config: &Config,
  index: &mut Index,
  client: &XkcdClient,
  json: bool,
  deadline: Instant,
) -> Result<()> {
  let mut out = std::io::stdout();

  match command {
    Command::Index { command } => match command {
      IndexCommand::Init { force, offline } => commands::index_init(index, force, offline, &mut out),
      IndexCommand::Update {
        check,
        force,
        workers,
        from,
      } => {
        let options = UpdateOptions {
          check,
          force,
          workers: workers.unwrap_or(config.workers),
          from,
          interval: UpdateOptions::interval_from_hours(config.update_interval_hours),
          deadline: Some(deadline),
        };
        commands::index_update(index, client, &options, &mut out).await
      }
      IndexCommand::Status => commands::index_status(index, json, &mut out),
    },
    Command::Infos { target } => {
      let result = commands::resolve(index, client, target).await?;
      commands::infos(&result.item, json, &mut out)
    }
    Command::Show { target, output } => {
      if json && output.is_none() {
        color_eyre::eyre::bail!("Cannot write an image to stdout in JSON mode, use --output");
      }
      let result = commands::resolve(index, client, target).await?;
      commands::show(&result, output.as_deref(), &mut out).await
    }
    Command::Search { query, limit } => commands::search(index, &query, limit, json, &mut out),
  }
}
