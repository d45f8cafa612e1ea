//! Handlers behind the CLI subcommands.
//!
//! Every handler writes its output to `out` so it can be tested without a
//! terminal; logs go through `tracing` and never to `out`.

use chrono::{DateTime, TimeDelta, Utc};
use color_eyre::{
  eyre::{bail, Report, WrapErr},
  Result,
};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tabled::{
  settings::{object::Columns, Modify, Style, Width},
  Table, Tabled,
};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::{CacheResult, Index, RemoteSource, SyncOptions};
use crate::error::Error;
use crate::xkcd::Item;

/// Widest a table cell gets before wrapping.
const MAX_COLUMN_WIDTH: usize = 80;

/// Comic selected on the command line: `latest` or a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
  #[default]
  Latest,
  Id(u32),
}

impl FromStr for Target {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("latest") {
      return Ok(Target::Latest);
    }
    match s.parse::<u32>() {
      Ok(id) if id > 0 => Ok(Target::Id(id)),
      _ => Err(format!("invalid comic number: {:?}, expected `latest` or a number", s)),
    }
  }
}

/// Key/value row of the detail tables
#[derive(Tabled)]
struct Field {
  #[tabled(rename = "Field")]
  name: &'static str,
  #[tabled(rename = "Value")]
  value: String,
}

#[derive(Tabled)]
struct SearchRow {
  #[tabled(rename = "#")]
  id: u32,
  #[tabled(rename = "Published")]
  published: String,
  #[tabled(rename = "Title")]
  title: String,
}

fn render<R: Tabled>(rows: Vec<R>) -> String {
  Table::new(rows)
    .with(Style::rounded())
    .with(Modify::new(Columns::new(1..)).with(Width::wrap(MAX_COLUMN_WIDTH)))
    .to_string()
}

/// `index init`
pub fn index_init(index: &mut Index, force: bool, offline: bool, out: &mut dyn Write) -> Result<()> {
  match index.initialize(force, offline) {
    Ok(()) => {}
    Err(Error::AlreadyInitialized) => bail!(
      "Index {} is already initialized, use --force to recreate it",
      index.path().display()
    ),
    Err(e) => return Err(e).wrap_err("Failed to initialize index"),
  }

  info!(index_path = %index.path().display(), offline, "index initialized");
  writeln!(
    out,
    "Initialized {} index at {}",
    if offline { "offline" } else { "online" },
    index.path().display()
  )?;
  Ok(())
}

/// Settings of `index update`.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
  /// Only report whether an update is due
  pub check: bool,
  /// Update even if the index is fresh
  pub force: bool,
  pub workers: usize,
  /// Re-synchronize from this id instead of the watermark
  pub from: Option<u32>,
  /// An index synced more recently than this is fresh
  pub interval: TimeDelta,
  pub deadline: Option<Instant>,
}

impl UpdateOptions {
  pub fn interval_from_hours(hours: u64) -> TimeDelta {
    i64::try_from(hours)
      .ok()
      .and_then(TimeDelta::try_hours)
      .unwrap_or(TimeDelta::MAX)
  }
}

/// `index update`
pub async fn index_update(
  index: &mut Index,
  client: &dyn RemoteSource,
  options: &UpdateOptions,
  out: &mut dyn Write,
) -> Result<()> {
  ensure_initialized(index)?;

  let watermark = index.watermark().wrap_err("Failed to get last update")?;
  let fresh = watermark
    .synced_at
    .is_some_and(|at| Utc::now().signed_duration_since(at) < options.interval);

  if fresh && !options.force && options.from.is_none() {
    debug!(last_update = ?watermark.synced_at, "index is up to date");
    writeln!(out, "Index is up to date")?;
    return Ok(());
  }
  if options.check {
    bail!("Index is outdated, run `xkcd index update`");
  }

  let latest = client
    .fetch_latest_id()
    .await
    .wrap_err("Failed to get latest comic")?;
  let start = options.from.unwrap_or(watermark.last_id.saturating_add(1));
  if latest < start {
    debug!(latest, last_id = watermark.last_id, "index is up to date");
    writeln!(out, "Index is up to date, latest comic is #{}", latest)?;
    return Ok(());
  }

  let mut sync = SyncOptions::new(options.workers);
  if let Some(deadline) = options.deadline {
    sync = sync.with_deadline(deadline);
  }
  let report = index
    .sync_range(client, start, latest, sync)
    .await
    .wrap_err("Failed to update index")?;

  writeln!(
    out,
    "Indexed {} comics from #{} to #{} ({} skipped), last comic is #{}",
    report.stored, report.start, report.end, report.skipped, report.last_id
  )?;
  Ok(())
}

#[derive(Debug, Serialize)]
struct Status {
  path: PathBuf,
  initialized: bool,
  offline: bool,
  items: u64,
  last_update: Option<DateTime<Utc>>,
  last_id: u32,
}

/// `index status`
pub fn index_status(index: &Index, json: bool, out: &mut dyn Write) -> Result<()> {
  let watermark = index.watermark().wrap_err("Failed to get last update")?;
  let items = if index.is_initialized() {
    index.count().wrap_err("Failed to count comics")?
  } else {
    0
  };
  let status = Status {
    path: index.path().to_path_buf(),
    initialized: index.is_initialized(),
    offline: index.offline(),
    items,
    last_update: watermark.synced_at,
    last_id: watermark.last_id,
  };

  if json {
    serde_json::to_writer_pretty(&mut *out, &status)?;
    writeln!(out)?;
    return Ok(());
  }

  let yes_no = |b: bool| String::from(if b { "yes" } else { "no" });
  let rows = vec![
    Field {
      name: "Index",
      value: status.path.display().to_string(),
    },
    Field {
      name: "Initialized",
      value: yes_no(status.initialized),
    },
    Field {
      name: "Offline",
      value: yes_no(status.offline),
    },
    Field {
      name: "Comics",
      value: status.items.to_string(),
    },
    Field {
      name: "Last update",
      value: status
        .last_update
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string()),
    },
    Field {
      name: "Last comic",
      value: status.last_id.to_string(),
    },
  ];
  writeln!(out, "{}", render(rows))?;
  Ok(())
}

/// Resolve a target through the index.
pub async fn resolve(
  index: &Index,
  client: &dyn RemoteSource,
  target: Target,
) -> Result<CacheResult> {
  let result = match target {
    Target::Latest => index.get_latest(client).await,
    Target::Id(id) => index.get(client, id).await,
  };
  let result = result.map_err(|e| {
    let message = if e.is_not_found() {
      match target {
        Target::Id(id) => format!("No such comic #{}", id),
        Target::Latest => "The latest comic could not be found".to_string(),
      }
    } else if e.is_retryable() {
      "Failed to get comic, the xkcd API may be unavailable, try again later".to_string()
    } else {
      "Failed to get comic".to_string()
    };
    Report::new(e).wrap_err(message)
  })?;
  debug!(id = result.item.id, source = ?result.source, "resolved comic");
  Ok(result)
}

/// `infos`
pub fn infos(item: &Item, json: bool, out: &mut dyn Write) -> Result<()> {
  if json {
    serde_json::to_writer_pretty(&mut *out, item)?;
    writeln!(out)?;
    return Ok(());
  }

  let rows: Vec<Field> = [
    ("Comic number", item.id.to_string()),
    ("Title", item.title.clone()),
    ("Published on", item.published_date.format("%Y-%m-%d").to_string()),
    ("URL", item.permalink.clone()),
    ("Image URL", item.content_url.clone()),
    ("Alt text", item.alt_text.clone()),
    ("Transcript", item.transcript_text.clone()),
    ("News", item.news_text.clone()),
  ]
  .into_iter()
  .filter(|(_, value)| !value.trim().is_empty())
  .map(|(name, value)| Field { name, value })
  .collect();

  writeln!(out, "{}", render(rows))?;
  Ok(())
}

/// `show`: write the raw image to `output`, or to `out`.
pub async fn show(result: &CacheResult, output: Option<&Path>, out: &mut dyn Write) -> Result<()> {
  let content = result
    .fetch_content()
    .await
    .wrap_err_with(|| format!("Failed to get image of comic {}", result.item.id))?;

  match output {
    Some(path) => {
      std::fs::write(path, &content)
        .wrap_err_with(|| format!("Failed to write image to {}", path.display()))?;
      info!(id = result.item.id, path = %path.display(), bytes = content.len(), "image written");
    }
    None => {
      out.write_all(&content)?;
      out.flush()?;
    }
  }
  Ok(())
}

/// `search`
pub fn search(index: &Index, query: &str, limit: usize, json: bool, out: &mut dyn Write) -> Result<()> {
  ensure_initialized(index)?;
  let items = index.search(query, limit).wrap_err("Failed to search index")?;

  if json {
    serde_json::to_writer_pretty(&mut *out, &items)?;
    writeln!(out)?;
    return Ok(());
  }
  if items.is_empty() {
    writeln!(out, "No comic matches {:?}", query)?;
    return Ok(());
  }

  let rows: Vec<SearchRow> = items
    .into_iter()
    .map(|item| SearchRow {
      id: item.id,
      published: item.published_date.format("%Y-%m-%d").to_string(),
      title: item.title,
    })
    .collect();
  writeln!(out, "{}", render(rows))?;
  Ok(())
}

fn ensure_initialized(index: &Index) -> Result<()> {
  if !index.is_initialized() {
    bail!(
      "Index {} is not initialized, run `xkcd index init` first",
      index.path().display()
    );
  }
  Ok(())
}
