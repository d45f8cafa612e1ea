//! Bulk synchronization of an id range into the index.
//!
//! The whole range is written inside one transaction. Items are fetched by a
//! bounded set of concurrent tasks; each write goes through the connection
//! mutex, so statements from different tasks never interleave.
//!
//! An item that cannot be fetched is logged and skipped: the catalog has holes
//! and a handful of broken entries should not block the rest. A failed write
//! or an expired deadline rolls the whole batch back.

use chrono::Utc;
use futures::{future, stream, StreamExt};
use rusqlite::params;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::storage::{upsert_item, Index};
use super::traits::RemoteSource;

/// How a range synchronization runs.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
  /// Maximum number of items fetched at the same time
  pub concurrency: usize,
  /// The batch fails if it is not finalized before this instant
  pub deadline: Option<Instant>,
}

impl SyncOptions {
  pub fn new(concurrency: usize) -> Self {
    Self {
      concurrency,
      deadline: None,
    }
  }

  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(deadline);
    self
  }

  fn deadline_passed(&self) -> bool {
    self.deadline.is_some_and(|d| Instant::now() >= d)
  }
}

/// Outcome of a successful synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub start: u32,
  pub end: u32,
  /// Items written in this batch
  pub stored: usize,
  /// Items that could not be fetched and were left out
  pub skipped: usize,
  /// Watermark after the commit
  pub last_id: u32,
  pub duration: Duration,
}

/// State shared by the tasks of one batch.
#[derive(Default)]
struct Batch {
  stored: AtomicUsize,
  skipped: AtomicUsize,
  failed: AtomicBool,
  failure: Mutex<Option<Error>>,
}

impl Batch {
  fn fail(&self, error: Error) {
    self.failed.store(true, Ordering::SeqCst);
    if let Ok(mut failure) = self.failure.lock() {
      failure.get_or_insert(error);
    }
  }

  fn has_failed(&self) -> bool {
    self.failed.load(Ordering::SeqCst)
  }

  fn take_failure(&self) -> Option<Error> {
    if !self.has_failed() {
      return None;
    }
    let failure = self.failure.lock().ok().and_then(|mut f| f.take());
    Some(failure.unwrap_or_else(|| Error::Persistence("updating index failed".into())))
  }
}

impl Index {
  /// Fetch every id in `start..=end` and store the results as one atomic batch.
  ///
  /// On success the watermark moves to the highest id stored (ids that could
  /// not be fetched are skipped, not retried). Taking `&mut self` keeps two
  /// batches from running on the same index.
  pub async fn sync_range(
    &mut self,
    client: &dyn RemoteSource,
    start: u32,
    end: u32,
    options: SyncOptions,
  ) -> Result<SyncReport> {
    if start == 0 || end < start {
      return Err(Error::InvalidRange { start, end });
    }
    if !self.is_initialized() {
      return Err(Error::UninitializedCache);
    }

    let this: &Index = self;
    let started = std::time::Instant::now();
    let workers = options.concurrency.max(1);
    debug!(start, end, workers, offline = this.offline(), "updating index");

    let tx = SyncTransaction::begin(this)?;
    let batch = Batch::default();

    let tasks = stream::iter(start..=end)
      .map(|id| this.sync_one(client, id, &batch))
      .buffer_unordered(workers)
      .for_each(|()| future::ready(()));

    let timed_out = match options.deadline {
      Some(deadline) => tokio::time::timeout_at(deadline, tasks).await.is_err(),
      None => {
        tasks.await;
        false
      }
    };

    if timed_out || options.deadline_passed() {
      tx.rollback();
      return Err(Error::Timeout);
    }
    if let Some(error) = batch.take_failure() {
      tx.rollback();
      return Err(error);
    }

    let last_id = tx.commit(end)?;
    let report = SyncReport {
      start,
      end,
      stored: batch.stored.load(Ordering::SeqCst),
      skipped: batch.skipped.load(Ordering::SeqCst),
      last_id,
      duration: started.elapsed(),
    };
    info!(
      start,
      end,
      stored = report.stored,
      skipped = report.skipped,
      last_id,
      duration = ?report.duration,
      "finished updating index"
    );
    Ok(report)
  }

  async fn sync_one(&self, client: &dyn RemoteSource, id: u32, batch: &Batch) {
    if batch.has_failed() {
      return;
    }

    let mut item = match client.fetch_item(id).await {
      Ok(item) => item,
      Err(e) => {
        warn!(id, error = %e, "failed to get item, skipping it");
        batch.skipped.fetch_add(1, Ordering::SeqCst);
        return;
      }
    };

    if self.offline() {
      match client.fetch_content(&item).await {
        Ok(data) => item.payload = Some(data),
        Err(e) => warn!(id, error = %e, "failed to get image content, keeping any stored image"),
      }
    }

    if batch.has_failed() {
      return;
    }
    match self.with_conn(|conn| upsert_item(conn, &item)) {
      Ok(()) => {
        batch.stored.fetch_add(1, Ordering::SeqCst);
        debug!(id, "updated item");
      }
      Err(e) => {
        warn!(id, error = %e, "failed to insert or update item");
        batch.fail(e);
      }
    }
  }
}

/// Write transaction spanning a whole batch, rolled back unless committed.
struct SyncTransaction<'a> {
  index: &'a Index,
  open: bool,
}

impl<'a> SyncTransaction<'a> {
  fn begin(index: &'a Index) -> Result<Self> {
    index
      .with_conn(|conn| conn.execute_batch("BEGIN IMMEDIATE"))
      .map_err(|e| Error::Persistence(format!("failed to start transaction: {}", e)))?;
    Ok(Self { index, open: true })
  }

  /// Move the watermark and commit. Returns the new `last_id`.
  ///
  /// The watermark never decreases and ignores rows above `end`, which only
  /// the read-through path can have written.
  fn commit(mut self, end: u32) -> Result<u32> {
    let last_id = self
      .index
      .with_conn(|conn| {
        let (stored_max, previous): (Option<u32>, u32) = conn.query_row(
          "SELECT (SELECT max(id) FROM items WHERE id <= ?1),
                  (SELECT coalesce(max(last_id), 0) FROM sync_watermark)",
          params![end],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let last_id = stored_max.unwrap_or(0).max(previous);
        conn.execute(
          "UPDATE sync_watermark SET synced_at = ?1, last_id = ?2",
          params![Utc::now().timestamp(), last_id],
        )?;
        conn.execute_batch("COMMIT")?;
        Ok(last_id)
      })
      .map_err(|e| Error::Persistence(format!("failed to commit index update: {}", e)))?;

    self.open = false;
    Ok(last_id)
  }

  fn rollback(mut self) {
    self.open = false;
    self.rollback_quietly();
  }

  fn rollback_quietly(&self) {
    if let Err(e) = self.index.with_conn(|conn| conn.execute_batch("ROLLBACK")) {
      warn!(error = %e, "failed to rollback transaction");
    }
  }
}

impl Drop for SyncTransaction<'_> {
  fn drop(&mut self) {
    if self.open {
      self.rollback_quietly();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testing::{image, item, MockSource};
  use tempfile::TempDir;

  fn initialized(dir: &TempDir, offline: bool) -> Index {
    let mut index = Index::open(dir.path().join("xkcd.index")).unwrap();
    index.initialize(false, offline).unwrap();
    index
  }

  fn stored_ids(index: &Index) -> Vec<u32> {
    index
      .with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT id FROM items ORDER BY id")?;
        let ids = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<u32>>>()?;
        Ok(ids)
      })
      .unwrap()
  }

  #[tokio::test]
  async fn test_sync_skips_failing_item() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(10).failing(&[7]);

    let report = index
      .sync_range(&source, 1, 10, SyncOptions::new(3))
      .await
      .unwrap();

    assert_eq!(report.stored, 9);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.last_id, 10);
    assert_eq!(stored_ids(&index), vec![1, 2, 3, 4, 5, 6, 8, 9, 10]);

    let watermark = index.watermark().unwrap();
    assert_eq!(watermark.last_id, 10);
    assert!(watermark.synced_at.is_some());
  }

  #[tokio::test]
  async fn test_watermark_is_highest_existing_id() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(10).without(&[9, 10]);

    let report = index
      .sync_range(&source, 1, 10, SyncOptions::new(4))
      .await
      .unwrap();
    assert_eq!(report.last_id, 8);
    assert_eq!(index.watermark().unwrap().last_id, 8);
  }

  #[tokio::test]
  async fn test_sync_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(6);

    index
      .sync_range(&source, 1, 6, SyncOptions::new(2))
      .await
      .unwrap();
    let first: Vec<_> = index.search("comic", 100).unwrap();

    index
      .sync_range(&source, 1, 6, SyncOptions::new(5))
      .await
      .unwrap();
    let second: Vec<_> = index.search("comic", 100).unwrap();

    assert_eq!(first, second);
    assert_eq!(index.count().unwrap(), 6);
  }

  #[tokio::test]
  async fn test_synced_items_are_served_without_network() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(5);
    index
      .sync_range(&source, 1, 5, SyncOptions::new(2))
      .await
      .unwrap();
    let fetches = source.fetches();

    for id in 1..=5 {
      let result = index.get(&source, id).await.unwrap();
      assert_eq!(result.item, item(id));
    }
    assert_eq!(source.fetches(), fetches);
  }

  #[tokio::test]
  async fn test_watermark_never_decreases() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(20);

    index
      .sync_range(&source, 1, 20, SyncOptions::new(4))
      .await
      .unwrap();
    let report = index
      .sync_range(&source, 3, 5, SyncOptions::new(4))
      .await
      .unwrap();

    assert_eq!(report.last_id, 20);
    assert_eq!(index.watermark().unwrap().last_id, 20);
  }

  #[tokio::test]
  async fn test_read_through_rows_above_range_do_not_inflate_watermark() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(50);

    index.get(&source, 50).await.unwrap();
    let report = index
      .sync_range(&source, 1, 10, SyncOptions::new(3))
      .await
      .unwrap();

    assert_eq!(report.last_id, 10);
  }

  #[tokio::test]
  async fn test_deadline_expiry_rolls_back() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(10).with_delay(Duration::from_millis(200));

    let options = SyncOptions::new(2).with_deadline(Instant::now() + Duration::from_millis(20));
    let err = index.sync_range(&source, 1, 10, options).await.unwrap_err();

    assert!(matches!(err, Error::Timeout));
    assert_eq!(index.count().unwrap(), 0);
    assert_eq!(index.watermark().unwrap().last_id, 0);
    assert_eq!(index.watermark().unwrap().synced_at, None);
  }

  #[tokio::test]
  async fn test_deadline_passed_before_finalization() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(3);

    let options = SyncOptions::new(3).with_deadline(Instant::now());
    let err = index.sync_range(&source, 1, 3, options).await.unwrap_err();

    assert!(matches!(err, Error::Timeout));
    assert_eq!(index.count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_write_failure_rolls_back_batch() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    index
      .with_conn(|conn| {
        conn.execute_batch(
          "CREATE TRIGGER reject_five BEFORE INSERT ON items WHEN NEW.id = 5
           BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
      })
      .unwrap();
    let source = MockSource::new(10);

    let err = index
      .sync_range(&source, 1, 10, SyncOptions::new(1))
      .await
      .unwrap_err();

    assert!(matches!(err, Error::Persistence(_)));
    assert_eq!(index.count().unwrap(), 0);
    assert_eq!(index.watermark().unwrap().last_id, 0);

    // The index is still usable afterwards
    index
      .with_conn(|conn| conn.execute_batch("DROP TRIGGER reject_five"))
      .unwrap();
    let report = index
      .sync_range(&source, 1, 10, SyncOptions::new(1))
      .await
      .unwrap();
    assert_eq!(report.stored, 10);
  }

  #[tokio::test]
  async fn test_offline_sync_stores_payloads() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, true);
    let source = MockSource::new(4).failing_content(&[2]);

    let report = index
      .sync_range(&source, 1, 4, SyncOptions::new(2))
      .await
      .unwrap();
    assert_eq!(report.stored, 4);

    let payloads: Vec<(u32, Option<Vec<u8>>)> = index
      .with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT id, payload FROM items ORDER BY id")?;
        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .unwrap();
    assert_eq!(
      payloads,
      vec![
        (1, Some(image(1))),
        (2, None),
        (3, Some(image(3))),
        (4, Some(image(4))),
      ]
    );
  }

  #[tokio::test]
  async fn test_offline_resync_keeps_stored_payload() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, true);
    index
      .sync_range(&MockSource::new(3), 1, 3, SyncOptions::new(2))
      .await
      .unwrap();

    let flaky = MockSource::new(3).failing_content(&[2]);
    let report = index
      .sync_range(&flaky, 1, 3, SyncOptions::new(2))
      .await
      .unwrap();
    assert_eq!(report.stored, 3);

    // The image stays servable with the network down
    flaky.network.down.store(true, Ordering::SeqCst);
    let result = index.get(&flaky, 2).await.unwrap();
    assert_eq!(result.source, crate::cache::CacheSource::Offline);
    assert_eq!(result.item.payload, Some(image(2)));
    assert_eq!(result.fetch_content().await.unwrap(), image(2));
  }

  #[tokio::test]
  async fn test_online_sync_does_not_fetch_content() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(4);

    index
      .sync_range(&source, 1, 4, SyncOptions::new(2))
      .await
      .unwrap();
    assert_eq!(source.network.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_invalid_ranges() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(4);

    assert!(matches!(
      index.sync_range(&source, 0, 4, SyncOptions::new(1)).await,
      Err(Error::InvalidRange { start: 0, end: 4 })
    ));
    assert!(matches!(
      index.sync_range(&source, 4, 3, SyncOptions::new(1)).await,
      Err(Error::InvalidRange { .. })
    ));
    assert_eq!(source.fetches(), 0);
  }

  #[tokio::test]
  async fn test_uninitialized_index() {
    let dir = TempDir::new().unwrap();
    let mut index = Index::open(dir.path().join("xkcd.index")).unwrap();
    let source = MockSource::new(4);

    let err = index
      .sync_range(&source, 1, 4, SyncOptions::new(1))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::UninitializedCache));
  }

  #[tokio::test]
  async fn test_zero_concurrency_still_runs() {
    let dir = TempDir::new().unwrap();
    let mut index = initialized(&dir, false);
    let source = MockSource::new(3);

    let report = index
      .sync_range(&source, 1, 3, SyncOptions::new(0))
      .await
      .unwrap();
    assert_eq!(report.stored, 3);
  }
}
