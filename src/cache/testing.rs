//! In-memory remote source for index tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};
use crate::xkcd::{Executor, Item, Request, Response};

use super::RemoteSource;

pub fn item(id: u32) -> Item {
  Item {
    id,
    title: format!("Comic {}", id),
    content_url: format!("https://imgs.xkcd.com/comics/{}.jpg", id),
    permalink: String::new(),
    published_date: NaiveDate::from_ymd_opt(2006, 1, 1).unwrap() + chrono::Days::new(id as u64),
    alt_text: format!("alt {}", id),
    transcript_text: String::new(),
    news_text: String::new(),
    payload: None,
  }
}

pub fn image(id: u32) -> Vec<u8> {
  let mut data = vec![0xff, 0xd8, 0xff];
  data.extend_from_slice(&id.to_be_bytes());
  data
}

/// Serves images for every URL it knows, counting requests.
#[derive(Default)]
pub struct MockNetwork {
  images: Mutex<HashMap<String, Vec<u8>>>,
  pub calls: AtomicUsize,
  pub down: AtomicBool,
}

#[async_trait]
impl Executor for MockNetwork {
  async fn execute(&self, request: Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.down.load(Ordering::SeqCst) {
      return Err(Error::RemoteTransient("network is down".into()));
    }
    let images = self.images.lock().unwrap();
    Ok(match images.get(request.url.as_str()) {
      Some(body) => Response {
        status: 200,
        content_type: Some("image/jpeg".into()),
        body: body.clone(),
      },
      None => Response {
        status: 404,
        content_type: None,
        body: Vec::new(),
      },
    })
  }
}

/// Remote catalog `1..=latest` with configurable failures.
pub struct MockSource {
  pub latest: u32,
  pub items: HashMap<u32, Item>,
  pub failing: HashSet<u32>,
  pub failing_content: HashSet<u32>,
  pub delay: Option<Duration>,
  pub fetches: AtomicUsize,
  pub fail_everything: AtomicBool,
  pub network: Arc<MockNetwork>,
}

impl MockSource {
  pub fn new(latest: u32) -> Self {
    let network = Arc::new(MockNetwork::default());
    let items: HashMap<u32, Item> = (1..=latest).map(|id| (id, item(id))).collect();
    {
      let mut images = network.images.lock().unwrap();
      for item in items.values() {
        images.insert(
          Url::parse(&item.content_url).unwrap().to_string(),
          image(item.id),
        );
      }
    }
    Self {
      latest,
      items,
      failing: HashSet::new(),
      failing_content: HashSet::new(),
      delay: None,
      fetches: AtomicUsize::new(0),
      fail_everything: AtomicBool::new(false),
      network,
    }
  }

  pub fn failing(mut self, ids: &[u32]) -> Self {
    self.failing.extend(ids);
    self
  }

  pub fn failing_content(mut self, ids: &[u32]) -> Self {
    self.failing_content.extend(ids);
    self
  }

  pub fn without(mut self, ids: &[u32]) -> Self {
    for id in ids {
      self.items.remove(id);
    }
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn fetches(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl RemoteSource for MockSource {
  async fn fetch_item(&self, id: u32) -> Result<Item> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.fail_everything.load(Ordering::SeqCst) || self.failing.contains(&id) {
      return Err(Error::RemoteTransient(format!("status code is 500 for {}", id)));
    }
    self
      .items
      .get(&id)
      .cloned()
      .ok_or(Error::RemoteNotFound(id))
  }

  async fn fetch_latest_id(&self) -> Result<u32> {
    if self.fail_everything.load(Ordering::SeqCst) {
      return Err(Error::RemoteTransient("status code is 500".into()));
    }
    Ok(self.latest)
  }

  async fn fetch_content(&self, item: &Item) -> Result<Vec<u8>> {
    if self.failing_content.contains(&item.id) {
      return Err(Error::RemoteTransient("unexpected status code: 500".into()));
    }
    item.fetch_content(self.network.as_ref()).await
  }

  fn executor(&self) -> Arc<dyn Executor> {
    self.network.clone()
  }
}
