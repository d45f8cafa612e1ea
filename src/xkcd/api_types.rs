//! Serde-deserializable types matching xkcd API responses.
//!
//! These types are separate from domain types so decoding stays lenient while
//! [`Item`] only ever holds validated data.

use chrono::NaiveDate;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

use super::types::Item;

// ============================================================================
// info.0.json response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiComic {
  #[serde(default)]
  pub num: u32,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub safe_title: String,
  #[serde(default)]
  pub img: String,
  #[serde(default)]
  pub link: String,
  #[serde(default)]
  pub alt: String,
  #[serde(default)]
  pub transcript: String,
  #[serde(default)]
  pub news: String,
  // The API sends the date as three separate strings
  #[serde(default)]
  pub day: String,
  #[serde(default)]
  pub month: String,
  #[serde(default)]
  pub year: String,
}

// ============================================================================
// Conversion to domain types
// ============================================================================

impl ApiComic {
  /// Validate the response and convert it into an [`Item`].
  pub fn into_item(self) -> Result<Item> {
    if self.num == 0 {
      return Err(invalid("comic number is zero".into()));
    }

    let day = parse_date_part(&self.day, "day", 1..=31)?;
    let month = parse_date_part(&self.month, "month", 1..=12)?;
    let year: i32 = self
      .year
      .trim()
      .parse()
      .map_err(|e| invalid(format!("failed to parse date year: {}", e)))?;
    let published_date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
      invalid(format!(
        "date {}-{:02}-{:02} is not a calendar date",
        year, month, day
      ))
    })?;

    validate_url(&self.img).map_err(|e| invalid(format!("comic image URL is invalid: {}", e)))?;
    if !self.link.is_empty() {
      validate_url(&self.link)
        .map_err(|e| invalid(format!("comic link URL is invalid: {}", e)))?;
    }

    let title = if self.title.is_empty() {
      self.safe_title
    } else {
      self.title
    };

    Ok(Item {
      id: self.num,
      title,
      content_url: self.img,
      permalink: self.link,
      published_date,
      alt_text: self.alt,
      transcript_text: self.transcript,
      news_text: self.news,
      payload: None,
    })
  }
}

fn invalid(message: String) -> Error {
  Error::RemoteTransient(message)
}

fn parse_date_part(value: &str, name: &str, range: std::ops::RangeInclusive<u32>) -> Result<u32> {
  let parsed: u32 = value
    .trim()
    .parse()
    .map_err(|e| invalid(format!("failed to parse date {}: {}", name, e)))?;
  if !range.contains(&parsed) {
    return Err(invalid(format!(
      "failed to parse date {}: invalid value for {}: {}",
      name, name, parsed
    )));
  }
  Ok(parsed)
}

/// Accept only absolute http(s) URLs with a host.
fn validate_url(value: &str) -> std::result::Result<(), String> {
  if value.trim().is_empty() {
    return Err("URL is empty".into());
  }
  let url = Url::parse(value).map_err(|_| "invalid syntax".to_string())?;
  if url.scheme() != "http" && url.scheme() != "https" {
    return Err(format!("unsupported scheme: {}", url.scheme()));
  }
  if url.host_str().map_or(true, str::is_empty) {
    return Err("URL does not have a host".into());
  }
  Ok(())
}
