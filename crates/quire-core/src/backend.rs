//! The [`Backend`] trait and supporting write types.
//!
//! A backend stores untyped [`Fields`] for any collection described by a
//! [`Schema`]. The SQLite implementation lives in `quire-store-sqlite`; an
//! alternate remote database plugs in through the same trait. Identifier
//! generation, defaults and timestamps are applied above this layer by
//! [`Collection`](crate::collection::Collection), so every backend sees
//! complete records.
//!
//! The trait is object safe so the registry can choose a backend at startup
//! and hand the same `Arc<dyn Backend>` to every collection.

use async_trait::async_trait;

use crate::{
  Result,
  query::{Fields, Filter, FindOptions},
  schema::Schema,
};

/// How many rows a delete may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
  /// The first match in the collection's default order.
  One,
  Many,
}

/// One step of an atomic batch submitted through [`Backend::apply`].
#[derive(Debug, Clone)]
pub enum WriteOp {
  /// Write `patch` into every row matching `filter`.
  Update {
    schema: &'static Schema,
    filter: Filter,
    patch:  Fields,
  },
  /// Remove every row matching `filter`.
  Delete {
    schema: &'static Schema,
    filter: Filter,
  },
}

#[async_trait]
pub trait Backend: Send + Sync {
  /// Short name for logs ("sqlite", "remote", ...).
  fn name(&self) -> &'static str;

  async fn find(
    &self,
    schema: &'static Schema,
    filter: &Filter,
    options: &FindOptions,
  ) -> Result<Vec<Fields>>;

  async fn count(&self, schema: &'static Schema, filter: &Filter) -> Result<u64>;

  /// Insert a complete record and return it as stored.
  ///
  /// A duplicate `id` must surface as
  /// [`Error::ConstraintViolation`](crate::Error::ConstraintViolation) with
  /// `field == Some("id")` so the caller can regenerate it.
  async fn insert(&self, schema: &'static Schema, fields: Fields) -> Result<Fields>;

  /// Merge `patch` into the first row matching `filter` and return the row
  /// after the update, or `None` when nothing matched.
  async fn update_one(
    &self,
    schema: &'static Schema,
    filter: &Filter,
    patch: Fields,
  ) -> Result<Option<Fields>>;

  async fn delete(
    &self,
    schema: &'static Schema,
    filter: &Filter,
    scope: DeleteScope,
  ) -> Result<u64>;

  /// Execute `ops` in order so that either all of them apply or none do.
  /// Returns the number of rows each op touched.
  async fn apply(&self, ops: Vec<WriteOp>) -> Result<Vec<u64>>;
}
