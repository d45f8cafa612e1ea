//! xkcd JSON API client and domain types.

pub mod api_types;
pub mod client;
pub mod executor;
pub mod types;

pub use client::XkcdClient;
pub use executor::{Executor, Request, Response};
pub use types::Item;
