//! Index handle: opening, initializing and closing the SQLite file.

use chrono::{DateTime, NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::xkcd::Item;

use super::schema::{INSERT_SETTING, OFFLINE_SETTING, SCHEMA, SELECT_SETTING, UPSERT_ITEM};
use super::traits::Watermark;

/// Local index of xkcd comics backed by a single SQLite file.
///
/// The connection is wrapped in a `Mutex` so concurrent sync tasks can share
/// one transaction while their statements stay serialized.
pub struct Index {
  path: PathBuf,
  conn: Option<Mutex<Connection>>,
  offline: bool,
}

impl Index {
  /// Open the index at `path`.
  ///
  /// A missing file yields an uninitialized index rather than an error.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let mut index = Self {
      path,
      conn: None,
      offline: false,
    };

    let metadata = match std::fs::metadata(&index.path) {
      Ok(m) => m,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(index_path = %index.path.display(), "index file does not exist");
        return Ok(index);
      }
      Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
      return Err(Error::InvalidPath(index.path));
    }

    debug!(index_path = %index.path.display(), "opening index");
    let conn = Connection::open(&index.path)?;
    let offline: Option<String> = conn
      .query_row(SELECT_SETTING, params![OFFLINE_SETTING], |row| row.get(0))
      .optional()
      .map_err(|e| incomplete(&index.path, e))?;
    let offline = offline.ok_or_else(|| {
      incomplete(
        &index.path,
        format!("{} setting is missing", OFFLINE_SETTING),
      )
    })?;

    index.offline = offline == "1";
    index.conn = Some(Mutex::new(conn));
    Ok(index)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Whether item images are stored in the index.
  pub fn offline(&self) -> bool {
    self.offline
  }

  pub fn is_initialized(&self) -> bool {
    self.conn.is_some()
  }

  /// Create the index schema.
  ///
  /// With `force`, an existing index is closed and deleted first. A failure
  /// half-way leaves the file in an unspecified state; delete it and retry.
  pub fn initialize(&mut self, force: bool, offline: bool) -> Result<()> {
    if self.is_initialized() && !force {
      return Err(Error::AlreadyInitialized);
    }

    if let Some(conn) = self.conn.take() {
      if let Err(e) = close_connection(conn) {
        warn!(error = %e, "failed to close previous index");
      }
      std::fs::remove_file(&self.path).map_err(|e| {
        Error::Persistence(format!("failed to remove previous index: {}", e))
      })?;
    }

    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::Persistence(format!("failed to create index directory: {}", e))
      })?;
    }

    debug!(index_path = %self.path.display(), offline, "creating a new index");
    let conn = Connection::open(&self.path)
      .map_err(|e| Error::Persistence(format!("failed to create index: {}", e)))?;

    for (what, sql) in SCHEMA {
      conn
        .execute_batch(sql)
        .map_err(|e| Error::Persistence(format!("failed to create {}: {}", what, e)))?;
    }
    conn
      .execute(
        INSERT_SETTING,
        params![OFFLINE_SETTING, if offline { "1" } else { "0" }],
      )
      .map_err(|e| Error::Persistence(format!("failed to set offline setting: {}", e)))?;

    debug!("created all tables");
    self.offline = offline;
    self.conn = Some(Mutex::new(conn));
    Ok(())
  }

  /// Close the index. Closing an uninitialized or closed index is a no-op.
  pub fn close(&mut self) -> Result<()> {
    match self.conn.take() {
      Some(conn) => close_connection(conn),
      None => Ok(()),
    }
  }

  /// Last successful bulk synchronization, `(None, 0)` if never synchronized.
  pub fn watermark(&self) -> Result<Watermark> {
    if !self.is_initialized() {
      return Ok(Watermark::default());
    }

    let row: Option<(i64, u32)> = self.with_conn(|conn| {
      conn
        .query_row(
          "SELECT synced_at, last_id FROM sync_watermark LIMIT 1",
          [],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
    })?;

    Ok(match row {
      Some((synced_at, last_id)) => Watermark {
        synced_at: (synced_at > 0)
          .then(|| DateTime::from_timestamp(synced_at, 0))
          .flatten(),
        last_id,
      },
      None => Watermark::default(),
    })
  }

  /// Run `f` with exclusive access to the connection.
  pub(crate) fn with_conn<T>(
    &self,
    f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
  ) -> Result<T> {
    let conn = self.conn.as_ref().ok_or(Error::UninitializedCache)?;
    let conn = conn
      .lock()
      .map_err(|e| Error::Persistence(format!("lock poisoned: {}", e)))?;
    Ok(f(&conn)?)
  }
}

impl std::fmt::Debug for Index {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Index")
      .field("path", &self.path)
      .field("initialized", &self.is_initialized())
      .field("offline", &self.offline)
      .finish()
  }
}

/// A file that is not a usable index cannot be reinitialized in place.
fn incomplete(path: &Path, cause: impl std::fmt::Display) -> Error {
  Error::Persistence(format!(
    "{} is not a complete index ({}), delete it and run `xkcd index init`",
    path.display(),
    cause
  ))
}

fn close_connection(conn: Mutex<Connection>) -> Result<()> {
  let conn = conn
    .into_inner()
    .map_err(|e| Error::Persistence(format!("lock poisoned: {}", e)))?;
  conn.close().map_err(|(_, e)| Error::from(e))
}

/// Insert or update a single item row, keeping a stored payload when `item` has none.
pub(crate) fn upsert_item(conn: &Connection, item: &Item) -> rusqlite::Result<()> {
  conn.execute(
    UPSERT_ITEM,
    params![
      item.id,
      item.title,
      item.content_url,
      item.permalink,
      date_to_timestamp(item.published_date),
      item.alt_text,
      item.transcript_text,
      item.news_text,
      item.payload,
    ],
  )?;
  Ok(())
}

/// Map a row selected with the `items` column order.
pub(crate) fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
  let published_at: i64 = row.get(4)?;
  let published_date = DateTime::from_timestamp(published_at, 0)
    .map(|dt| dt.date_naive())
    .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, published_at))?;

  Ok(Item {
    id: row.get(0)?,
    title: row.get(1)?,
    content_url: row.get(2)?,
    permalink: row.get(3)?,
    published_date,
    alt_text: row.get(5)?,
    transcript_text: row.get(6)?,
    news_text: row.get(7)?,
    payload: row.get(8)?,
  })
}

/// Dates are stored as unix seconds at midnight UTC.
fn date_to_timestamp(date: NaiveDate) -> i64 {
  date.and_time(NaiveTime::MIN).and_utc().timestamp()
}
