//! SQLite backend for the quire record store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Writes that meet a locked database are
//! retried according to a [`RetryPolicy`].

mod encode;
mod query;
mod schema;
mod store;

pub mod error;
pub mod retry;

pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
