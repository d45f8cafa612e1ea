//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::xkcd::{Executor, Item};

/// Remote catalog the index reads through and synchronizes from.
#[async_trait]
pub trait RemoteSource: Send + Sync {
  /// Fetch a single item. Missing ids fail with `Error::RemoteNotFound`.
  async fn fetch_item(&self, id: u32) -> Result<Item>;

  /// Highest id currently published.
  async fn fetch_latest_id(&self) -> Result<u32>;

  /// Fetch the binary content (image) of an item.
  async fn fetch_content(&self, item: &Item) -> Result<Vec<u8>>;

  /// Executor used for network requests, the fallback of offline executors.
  fn executor(&self) -> Arc<dyn Executor>;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Clone)]
pub struct CacheResult {
  /// The actual data
  pub item: Item,
  /// Where the data came from
  pub source: CacheSource,
  executor: Arc<dyn Executor>,
}

impl CacheResult {
  pub(crate) fn new(item: Item, source: CacheSource, executor: Arc<dyn Executor>) -> Self {
    Self {
      item,
      source,
      executor,
    }
  }

  /// Fetch the item's image, from the index when it was stored offline.
  pub async fn fetch_content(&self) -> Result<Vec<u8>> {
    self.item.fetch_content(self.executor.as_ref()).await
  }
}

impl std::fmt::Debug for CacheResult {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheResult")
      .field("item", &self.item)
      .field("source", &self.source)
      .finish_non_exhaustive()
  }
}

/// Indicates where an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the API on a cache miss
  Network,
  /// Found in the index, image served from the network
  Cache,
  /// Found in the index with its image stored locally
  Offline,
}

/// Last successful bulk synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Watermark {
  /// When the index was last synchronized, `None` if never
  pub synced_at: Option<DateTime<Utc>>,
  /// Highest id known to be present in the index
  pub last_id: u32,
}
