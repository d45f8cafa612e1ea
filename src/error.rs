//! Error taxonomy shared by the index and the remote client.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// The index target exists but is a directory.
  #[error("index file {} is a directory, not a file", .0.display())]
  InvalidPath(PathBuf),

  #[error("index is already initialized")]
  AlreadyInitialized,

  /// An operation needs the schema but the index was never initialized.
  #[error("index is not initialized")]
  UninitializedCache,

  /// The item does not exist upstream.
  #[error("no such item: {0}")]
  RemoteNotFound(u32),

  /// Network, status or decoding failure while talking to the API.
  #[error("xkcd API error: {0}")]
  RemoteTransient(String),

  /// A remote failure surfaced while resolving an item through the index.
  #[error("failed to fetch item {id} from API")]
  Remote {
    id: u32,
    #[source]
    source: Box<Error>,
  },

  /// The id of the latest item could not be resolved.
  #[error("failed to resolve the latest item from API")]
  RemoteLatest(#[source] Box<Error>),

  /// Local write, read or schema failure.
  #[error("index persistence error: {0}")]
  Persistence(String),

  #[error("operation timed out, consider increasing it with `--timeout`")]
  Timeout,

  #[error("invalid range {start}..={end}: start must be at least 1 and not greater than end")]
  InvalidRange { start: u32, end: u32 },
}

impl Error {
  /// True when the item does not exist upstream, as opposed to a malfunction.
  pub fn is_not_found(&self) -> bool {
    match self {
      Error::RemoteNotFound(_) => true,
      Error::Remote { source, .. } | Error::RemoteLatest(source) => source.is_not_found(),
      _ => false,
    }
  }

  /// Returns `true` if retrying might succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      Error::RemoteTransient(_) | Error::Timeout => true,
      Error::Remote { source, .. } | Error::RemoteLatest(source) => source.is_retryable(),
      _ => false,
    }
  }

  pub(crate) fn remote(id: u32, source: Error) -> Self {
    Error::Remote {
      id,
      source: Box::new(source),
    }
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Error::Persistence(e.to_string())
  }
}

impl From<std::io::Error> for Error {
  fn from(e: std::io::Error) -> Self {
    Error::Persistence(e.to_string())
  }
}
