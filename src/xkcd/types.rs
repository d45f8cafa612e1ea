use chrono::NaiveDate;
use serde::Serialize;
use url::Url;

use crate::error::{Error, Result};

use super::executor::{Executor, Request};

/// A comic, as published by the xkcd API.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Item {
  pub id: u32,
  pub title: String,
  /// URL of the comic image
  pub content_url: String,
  /// Optional external link attached to the comic, may be empty
  pub permalink: String,
  pub published_date: NaiveDate,
  pub alt_text: String,
  pub transcript_text: String,
  pub news_text: String,
  /// Raw image bytes, only kept by indexes created in offline mode
  #[serde(skip)]
  pub payload: Option<Vec<u8>>,
}

impl std::fmt::Debug for Item {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Item")
      .field("id", &self.id)
      .field("title", &self.title)
      .field("content_url", &self.content_url)
      .field("permalink", &self.permalink)
      .field("published_date", &self.published_date)
      .field("alt_text", &self.alt_text)
      .field("transcript_text", &self.transcript_text)
      .field("news_text", &self.news_text)
      .field("payload", &self.payload.as_ref().map(Vec::len))
      .finish()
  }
}

/// Image content types accepted from the API.
const IMAGE_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png"];

impl Item {
  /// Fetch the comic image through the given executor.
  ///
  /// The executor decides where the bytes come from: the network, or the
  /// payload stored in an offline index.
  pub async fn fetch_content(&self, executor: &dyn Executor) -> Result<Vec<u8>> {
    if self.content_url.trim().is_empty() {
      return Err(Error::RemoteTransient("image URL is missing".into()));
    }
    let url = Url::parse(&self.content_url)
      .map_err(|e| Error::RemoteTransient(format!("invalid image URL: {}", e)))?;

    tracing::debug!(id = self.id, url = %url, "fetching image");
    let response = executor.execute(Request::get(url)).await?;

    match response.status {
      200 => {}
      404 => return Err(Error::RemoteNotFound(self.id)),
      status => {
        return Err(Error::RemoteTransient(format!(
          "unexpected status code: {}",
          status
        )))
      }
    }

    let content_type = response.mime_type().unwrap_or_default();
    if !IMAGE_CONTENT_TYPES.contains(&content_type.as_str()) {
      return Err(Error::RemoteTransient(format!(
        "unexpected or undefined content-type: {}",
        content_type
      )));
    }

    Ok(response.body)
  }
}
