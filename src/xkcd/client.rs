use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::RemoteSource;
use crate::config::Config;
use crate::error::{Error, Result};

use super::api_types::ApiComic;
use super::executor::{Executor, HttpExecutor, Request};
use super::types::Item;

/// xkcd JSON API client
#[derive(Clone)]
pub struct XkcdClient {
  base_url: Url,
  executor: Arc<dyn Executor>,
}

impl XkcdClient {
  pub fn new(config: &Config) -> Result<Self> {
    let executor = HttpExecutor::new(
      &config.user_agent,
      Duration::from_millis(config.timeout_ms),
    )?;
    Self::with_executor(&config.api_url, Arc::new(executor))
  }

  /// Build a client that sends every request through `executor`.
  pub fn with_executor(api_url: &str, executor: Arc<dyn Executor>) -> Result<Self> {
    // Url::join replaces the last path segment unless the base ends with '/'
    let normalized = if api_url.ends_with('/') {
      api_url.to_string()
    } else {
      format!("{}/", api_url)
    };
    let base_url = Url::parse(&normalized)
      .map_err(|e| Error::RemoteTransient(format!("invalid API URL {}: {}", api_url, e)))?;

    Ok(Self { base_url, executor })
  }

  /// Get the latest comic
  pub async fn fetch_latest(&self) -> Result<Item> {
    let url = self.endpoint("info.0.json")?;
    self.fetch(url, None).await
  }

  /// Get a comic by number
  pub async fn fetch_item(&self, id: u32) -> Result<Item> {
    if id == 0 {
      return Err(Error::RemoteNotFound(id));
    }
    let url = self.endpoint(&format!("{}/info.0.json", id))?;
    self.fetch(url, Some(id)).await
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| Error::RemoteTransient(format!("failed to build URL for {}: {}", path, e)))
  }

  async fn fetch(&self, url: Url, id: Option<u32>) -> Result<Item> {
    tracing::debug!(url = %url, "fetching item");
    let response = self.executor.execute(Request::get(url)).await?;

    match response.status {
      200 => {}
      404 => return Err(Error::RemoteNotFound(id.unwrap_or_default())),
      status => {
        return Err(Error::RemoteTransient(format!(
          "status code is {}",
          status
        )))
      }
    }

    let comic: ApiComic = serde_json::from_slice(&response.body)
      .map_err(|e| Error::RemoteTransient(format!("failed to decode response: {}", e)))?;
    comic.into_item()
  }
}

#[async_trait]
impl RemoteSource for XkcdClient {
  async fn fetch_item(&self, id: u32) -> Result<Item> {
    XkcdClient::fetch_item(self, id).await
  }

  async fn fetch_latest_id(&self) -> Result<u32> {
    Ok(self.fetch_latest().await?.id)
  }

  async fn fetch_content(&self, item: &Item) -> Result<Vec<u8>> {
    item.fetch_content(self.executor.as_ref()).await
  }

  fn executor(&self) -> Arc<dyn Executor> {
    Arc::clone(&self.executor)
  }
}
