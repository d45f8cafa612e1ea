//! Executor serving images stored in an offline index.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::xkcd::{Executor, Request, Response};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Answers requests from a stored payload, or passes them to `fallback`
/// when the payload is empty.
pub struct OfflineExecutor {
  payload: Vec<u8>,
  fallback: Arc<dyn Executor>,
}

impl OfflineExecutor {
  pub fn new(payload: Vec<u8>, fallback: Arc<dyn Executor>) -> Self {
    Self { payload, fallback }
  }

  /// Whether requests are answered without touching the network.
  pub fn is_offline(&self) -> bool {
    !self.payload.is_empty()
  }
}

#[async_trait]
impl Executor for OfflineExecutor {
  async fn execute(&self, request: Request) -> Result<Response> {
    if !self.is_offline() {
      debug!(url = %request.url, "image was indexed online, serving from HTTP");
      return self.fallback.execute(request).await;
    }

    debug!(url = %request.url, "image was indexed offline, serving from index");
    let content_type = if self.payload.starts_with(PNG_SIGNATURE) {
      "image/png"
    } else {
      "image/jpeg"
    };
    Ok(Response {
      status: 200,
      content_type: Some(content_type.to_string()),
      body: self.payload.clone(),
    })
  }
}
