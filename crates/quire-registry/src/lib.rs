//! Collection registry for the quire record store.
//!
//! Resolves the configured backend once at startup and hands every
//! collection handle the same [`Backend`](quire_core::Backend).

pub mod config;
pub mod registry;

pub use config::{BackendKind, ResolvedBackend, RetrySettings, StoreConfig};
pub use registry::{Registry, RemoteConnector};
