//! Read-through access to single items, and local search.

use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::xkcd::{Executor, Item};

use super::offline::OfflineExecutor;
use super::schema::{SEARCH_ITEMS, SELECT_ITEM};
use super::storage::{item_from_row, upsert_item, Index};
use super::traits::{CacheResult, CacheSource, RemoteSource};

impl Index {
  /// Get an item, from the index when present, else from `client`.
  ///
  /// 1. Check the index - on a hit, return immediately without network access
  /// 2. On a miss, fetch from the API
  /// 3. Store the fetched item, best effort: a failed write is only logged
  pub async fn get(&self, client: &dyn RemoteSource, id: u32) -> Result<CacheResult> {
    if let Some(item) = self.lookup(id)? {
      debug!(id, "item found in index");
      let source = if item.payload.as_ref().is_some_and(|p| !p.is_empty()) {
        CacheSource::Offline
      } else {
        CacheSource::Cache
      };
      let executor = offline_executor(&item, client.executor());
      return Ok(CacheResult::new(item, source, executor));
    }

    let item = client
      .fetch_item(id)
      .await
      .map_err(|e| Error::remote(id, e))?;

    if self.is_initialized() {
      if let Err(e) = self.with_conn(|conn| upsert_item(conn, &item)) {
        warn!(id, error = %e, "failed to index item");
      }
    }

    Ok(CacheResult::new(item, CacheSource::Network, client.executor()))
  }

  /// Get the most recently published item.
  pub async fn get_latest(&self, client: &dyn RemoteSource) -> Result<CacheResult> {
    let id = client
      .fetch_latest_id()
      .await
      .map_err(|e| Error::RemoteLatest(Box::new(e)))?;
    self.get(client, id).await
  }

  /// Items whose title, alt text, transcript or news contain `query`,
  /// case-insensitively, newest first.
  pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Item>> {
    let pattern = format!("%{}%", escape_like(query.trim()));
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    self.with_conn(|conn| {
      let mut stmt = conn.prepare(SEARCH_ITEMS)?;
      let items = stmt
        .query_map(params![pattern, limit], item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(items)
    })
  }

  /// Number of items stored in the index.
  pub fn count(&self) -> Result<u64> {
    self.with_conn(|conn| conn.query_row("SELECT count(*) FROM items", [], |row| row.get(0)))
  }

  /// Look an item up locally. An uninitialized index never has anything.
  fn lookup(&self, id: u32) -> Result<Option<Item>> {
    if !self.is_initialized() {
      return Ok(None);
    }
    self
      .with_conn(|conn| conn.query_row(SELECT_ITEM, params![id], item_from_row).optional())
      .map_err(|e| Error::Persistence(format!("failed to search item in index: {}", e)))
  }
}

fn offline_executor(item: &Item, network: Arc<dyn Executor>) -> Arc<dyn Executor> {
  let payload = item.payload.clone().unwrap_or_default();
  Arc::new(OfflineExecutor::new(payload, network))
}

/// Escape `LIKE` wildcards so the query matches literally.
fn escape_like(query: &str) -> String {
  let mut escaped = String::with_capacity(query.len());
  for c in query.chars() {
    if matches!(c, '%' | '_' | '\\') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}
