//! Local index of xkcd comics.
//!
//! This module provides the persistence side of the tool:
//! - Creates and opens the SQLite index file, with an optional offline mode
//!   that also stores every image
//! - Reads items through the index, falling back to the API on a miss
//! - Synchronizes id ranges in one atomic batch and tracks a watermark
//! - Serves stored images through an executor that never touches the network

mod layer;
mod offline;
mod schema;
mod storage;
mod sync;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use storage::Index;
pub use sync::SyncOptions;
pub use traits::{CacheResult, RemoteSource};

#[cfg(test)]
pub(crate) use traits::CacheSource;
