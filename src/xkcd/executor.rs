//! Request execution seam.
//!
//! Every HTTP request made by the client goes through an [`Executor`]. The
//! production implementation wraps `reqwest`; the index swaps in an offline
//! executor for items whose image is stored locally.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// A GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub url: Url,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self { url }
  }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl Response {
  /// Content type without parameters, lowercased (`image/png; q=1` -> `image/png`).
  pub fn mime_type(&self) -> Option<String> {
    self
      .content_type
      .as_deref()
      .and_then(|ct| ct.split(';').next())
      .map(|ct| ct.trim().to_lowercase())
  }
}

#[async_trait]
pub trait Executor: Send + Sync {
  /// Perform the request and return the buffered response.
  ///
  /// Non-2xx statuses are not errors at this level; only transport failures are.
  async fn execute(&self, request: Request) -> Result<Response>;
}

/// Executor backed by a `reqwest` client.
#[derive(Clone)]
pub struct HttpExecutor {
  client: reqwest::Client,
}

impl HttpExecutor {
  pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .connect_timeout(Duration::from_secs(10))
      .user_agent(user_agent)
      .build()
      .map_err(|e| Error::RemoteTransient(format!("failed to create HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Executor for HttpExecutor {
  async fn execute(&self, request: Request) -> Result<Response> {
    let response = self
      .client
      .get(request.url)
      .send()
      .await
      .map_err(|e| Error::RemoteTransient(format!("failed to send request: {}", e)))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| Error::RemoteTransient(format!("failed to read response body: {}", e)))?
      .to_vec();

    Ok(Response {
      status,
      content_type,
      body,
    })
  }
}
