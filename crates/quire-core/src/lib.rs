//! Core types and trait definitions for the quire record store.
//!
//! This crate is deliberately free of database dependencies. It defines the
//! record types, their column schemas, the [`Backend`](backend::Backend)
//! trait every storage engine implements, and the typed stores (folders,
//! chats, personas, knowledge bases, ...) built on top of it.

pub mod backend;
pub mod chat;
pub mod collection;
pub mod document;
pub mod error;
pub mod folder;
pub mod id;
pub mod knowledge;
pub mod persona;
pub mod query;
pub mod record;
pub mod schema;
pub mod settings;

pub use backend::{Backend, DeleteScope, WriteOp};
pub use collection::Collection;
pub use error::{Error, Result};
pub use query::{Fields, Filter, FindOptions, Patch};
pub use record::Record;
