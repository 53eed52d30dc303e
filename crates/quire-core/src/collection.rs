//! [`Collection`], the typed query engine over one logical collection.

use std::{marker::PhantomData, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
  Error, Result,
  backend::{Backend, DeleteScope, WriteOp},
  id::{self, MAX_ID_ATTEMPTS},
  query::{Fields, Filter, FindOptions, Patch, to_fields},
  record::Record,
  schema::{Schema, timestamp_value},
};

/// Fields an update may never change.
const IMMUTABLE_FIELDS: &[&str] = &["id", "created_at"];

/// A handle on one collection, typed by its record.
///
/// Cloning is cheap; every clone shares the same backend.
pub struct Collection<R> {
  backend:        Arc<dyn Backend>,
  id_source:      fn() -> String,
  managed_writes: bool,
  _record:        PhantomData<fn() -> R>,
}

impl<R> Clone for Collection<R> {
  fn clone(&self) -> Self {
    Self {
      backend:        Arc::clone(&self.backend),
      id_source:      self.id_source,
      managed_writes: self.managed_writes,
      _record:        PhantomData,
    }
  }
}

impl<R: Record> Collection<R> {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self {
      backend,
      id_source: id::generate,
      managed_writes: false,
      _record: PhantomData,
    }
  }

  /// A handle that may write [`Record::MANAGED_FIELDS`]. Only the owning
  /// store holds one.
  pub(crate) fn with_managed_writes(mut self) -> Self {
    self.managed_writes = true;
    self
  }

  /// A copy of this handle that refuses writes to managed fields.
  pub(crate) fn without_managed_writes(&self) -> Self {
    Self { managed_writes: false, ..self.clone() }
  }

  /// Replace the identifier generator used by [`Collection::create`].
  pub fn with_id_source(mut self, id_source: fn() -> String) -> Self {
    self.id_source = id_source;
    self
  }

  pub fn schema(&self) -> &'static Schema { R::SCHEMA }

  pub fn backend(&self) -> &Arc<dyn Backend> { &self.backend }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn find(&self, filter: &Filter) -> Result<Vec<R>> {
    self.find_with(filter, &FindOptions::default()).await
  }

  pub async fn find_with(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<R>> {
    filter.validate(R::SCHEMA)?;
    options.validate(R::SCHEMA)?;
    let rows = self.backend.find(R::SCHEMA, filter, options).await?;
    rows.into_iter().map(decode::<R>).collect()
  }

  pub async fn find_one(&self, filter: &Filter) -> Result<Option<R>> {
    let options = FindOptions::new().limit(1);
    Ok(self.find_with(filter, &options).await?.into_iter().next())
  }

  pub async fn find_by_id(&self, id: &str) -> Result<Option<R>> {
    self.find_one(&Filter::by_id(id)).await
  }

  /// Like [`Collection::find_by_id`], but a missing record is an error.
  pub async fn get(&self, id: &str) -> Result<R> {
    self
      .find_by_id(id)
      .await?
      .ok_or_else(|| Error::not_found(R::SCHEMA.entity, id))
  }

  pub async fn count(&self, filter: &Filter) -> Result<u64> {
    filter.validate(R::SCHEMA)?;
    self.backend.count(R::SCHEMA, filter).await
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  /// Insert a new record built from `data`.
  ///
  /// Assigns an identifier unless `data` carries a valid one, applies column
  /// defaults and stamps both timestamps. A generated identifier that
  /// collides is regenerated up to [`MAX_ID_ATTEMPTS`] times.
  pub async fn create<T: Serialize + ?Sized>(&self, data: &T) -> Result<R> {
    let schema = R::SCHEMA;
    let fields = to_fields(data)?;
    self.guard_managed(&fields)?;
    let (supplied, fields) = prepare_insert(schema, fields)?;

    for attempt in 1..=MAX_ID_ATTEMPTS {
      let id = supplied.clone().unwrap_or_else(self.id_source);
      let mut row = fields.clone();
      row.insert("id".to_owned(), Value::String(id));

      match self.backend.insert(schema, row).await {
        Ok(stored) => return decode(stored),
        Err(Error::ConstraintViolation { field: Some(ref field), .. })
          if field == "id" && supplied.is_none() =>
        {
          warn!(collection = schema.name, attempt, "identifier collision, regenerating");
        }
        Err(e) => return Err(e),
      }
    }

    Err(Error::IdentifierExhausted {
      collection: schema.name,
      attempts:   MAX_ID_ATTEMPTS,
    })
  }

  pub async fn find_by_id_and_update(&self, id: &str, patch: Patch) -> Result<Option<R>> {
    self.find_one_and_update(&Filter::by_id(id), patch).await
  }

  /// Merge `patch` into the first match and return the updated record.
  /// `updated_at` is refreshed even when the patch is empty.
  pub async fn find_one_and_update(&self, filter: &Filter, patch: Patch) -> Result<Option<R>> {
    filter.validate(R::SCHEMA)?;
    self.guard_managed(patch.fields())?;
    let patch = prepare_patch(R::SCHEMA, patch)?;
    self
      .backend
      .update_one(R::SCHEMA, filter, patch)
      .await?
      .map(decode)
      .transpose()
  }

  /// Like [`Collection::find_by_id_and_update`], but a missing record is an
  /// error.
  pub async fn update(&self, id: &str, patch: Patch) -> Result<R> {
    self
      .find_by_id_and_update(id, patch)
      .await?
      .ok_or_else(|| Error::not_found(R::SCHEMA.entity, id))
  }

  /// Delete a record and return it as it was before removal.
  pub async fn find_by_id_and_delete(&self, id: &str) -> Result<Option<R>> {
    let Some(record) = self.find_by_id(id).await? else {
      return Ok(None);
    };
    let removed = self
      .backend
      .delete(R::SCHEMA, &Filter::by_id(id), DeleteScope::One)
      .await?;
    Ok((removed > 0).then_some(record))
  }

  pub async fn delete_one(&self, filter: &Filter) -> Result<u64> {
    filter.validate(R::SCHEMA)?;
    self.backend.delete(R::SCHEMA, filter, DeleteScope::One).await
  }

  pub async fn delete_many(&self, filter: &Filter) -> Result<u64> {
    filter.validate(R::SCHEMA)?;
    self.backend.delete(R::SCHEMA, filter, DeleteScope::Many).await
  }

  // ── Batches ───────────────────────────────────────────────────────────────

  /// Build an update step for [`Backend::apply`], prepared exactly like
  /// [`Collection::find_one_and_update`] prepares its patch.
  pub fn update_op(&self, filter: Filter, patch: Patch) -> Result<WriteOp> {
    filter.validate(R::SCHEMA)?;
    self.guard_managed(patch.fields())?;
    Ok(WriteOp::Update {
      schema: R::SCHEMA,
      filter,
      patch: prepare_patch(R::SCHEMA, patch)?,
    })
  }

  pub fn delete_op(&self, filter: Filter) -> Result<WriteOp> {
    filter.validate(R::SCHEMA)?;
    Ok(WriteOp::Delete { schema: R::SCHEMA, filter })
  }

  pub async fn apply(&self, ops: Vec<WriteOp>) -> Result<Vec<u64>> {
    if ops.is_empty() {
      return Ok(Vec::new());
    }
    self.backend.apply(ops).await
  }

  fn guard_managed(&self, fields: &Fields) -> Result<()> {
    if self.managed_writes {
      return Ok(());
    }
    match R::MANAGED_FIELDS.iter().find(|name| fields.contains_key(**name)) {
      Some(name) => Err(Error::InvalidArgument(format!(
        "{name} of a {} can only be changed through its store",
        R::SCHEMA.entity
      ))),
      None => Ok(()),
    }
  }
}

// ─── Preparation ─────────────────────────────────────────────────────────────

fn decode<R: Record>(fields: Fields) -> Result<R> {
  serde_json::from_value(Value::Object(fields)).map_err(|source| Error::Decode {
    collection: R::SCHEMA.name,
    source,
  })
}

/// Drop keys the collection does not store.
fn retain_columns(schema: &Schema, fields: &mut Fields) {
  fields.retain(|name, _| {
    let known = schema.column(name).is_some();
    if !known {
      debug!(collection = schema.name, field = %name, "skipping non-column field");
    }
    known
  });
}

/// Returns the caller-supplied identifier, if any, and the record with
/// defaults and timestamps applied.
fn prepare_insert(schema: &Schema, mut fields: Fields) -> Result<(Option<String>, Fields)> {
  retain_columns(schema, &mut fields);

  let supplied = match fields.remove("id") {
    None | Some(Value::Null) => None,
    Some(Value::String(id)) if id::is_valid(&id) => Some(id),
    Some(other) => {
      return Err(Error::InvalidArgument(format!(
        "{other} is not a valid {} identifier",
        schema.entity
      )));
    }
  };

  let now = timestamp_value(Utc::now());
  for stamp in ["created_at", "updated_at"] {
    if fields.get(stamp).is_none_or(Value::is_null) {
      fields.insert(stamp.to_owned(), now.clone());
    }
  }

  for column in schema.fields {
    if fields.get(column.name).is_some_and(|v| !v.is_null()) {
      continue;
    }
    match column.default.value() {
      Some(value) => {
        fields.insert(column.name.to_owned(), value);
      }
      None => {
        return Err(Error::InvalidArgument(format!(
          "missing required field {:?} for {}",
          column.name, schema.entity
        )));
      }
    }
  }

  check_values(schema, &fields)?;
  Ok((supplied, fields))
}

fn prepare_patch(schema: &Schema, patch: Patch) -> Result<Fields> {
  let mut fields = patch.into_fields();
  for name in IMMUTABLE_FIELDS {
    if fields.remove(*name).is_some() {
      debug!(collection = schema.name, field = name, "ignoring immutable field in patch");
    }
  }
  retain_columns(schema, &mut fields);
  check_values(schema, &fields)?;
  fields.insert("updated_at".to_owned(), timestamp_value(Utc::now()));
  Ok(fields)
}

/// Every value must fit its column before anything reaches the backend, so
/// a stored row always decodes back into its record.
fn check_values(schema: &Schema, fields: &Fields) -> Result<()> {
  for (name, value) in fields {
    if let Some(column) = schema.column(name) {
      column.check(schema, value)?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::schema::{CHATS, DOCUMENTS, KNOWLEDGE_BASES, PERSONAS};

  fn fields(value: Value) -> Fields {
    match value {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  #[test]
  fn insert_applies_defaults_and_timestamps() {
    let (supplied, row) = prepare_insert(
      &PERSONAS,
      fields(json!({ "owner_id": "u1", "name": "Helper" })),
    )
    .unwrap();

    assert!(supplied.is_none());
    assert_eq!(row["is_active"], json!(false));
    assert_eq!(row["system_prompt"], json!(""));
    assert_eq!(row["description"], Value::Null);
    assert_eq!(row["created_at"], row["updated_at"]);
  }

  #[test]
  fn insert_requires_required_fields() {
    let err = prepare_insert(&PERSONAS, fields(json!({ "owner_id": "u1" }))).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(ref m) if m.contains("name")));
  }

  #[test]
  fn insert_drops_foreign_fields() {
    let (_, row) = prepare_insert(
      &CHATS,
      fields(json!({ "owner_id": "u1", "render": "helper", "isDirty": true })),
    )
    .unwrap();
    assert!(!row.contains_key("render"));
    assert!(!row.contains_key("isDirty"));
    assert_eq!(row["messages"], json!([]));
  }

  #[test]
  fn insert_validates_supplied_id() {
    let err = prepare_insert(
      &CHATS,
      fields(json!({ "id": "short", "owner_id": "u1" })),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let id = id::generate();
    let (supplied, _) =
      prepare_insert(&CHATS, fields(json!({ "id": id, "owner_id": "u1" }))).unwrap();
    assert_eq!(supplied.as_deref(), Some(id.as_str()));
  }

  #[test]
  fn patch_strips_immutable_fields_and_stamps_update() {
    let patch = Patch::new()
      .set("id", "0000")
      .set("created_at", "2020-01-01T00:00:00Z")
      .set("title", "Renamed")
      .set("onClick", "fn");
    let row = prepare_patch(&CHATS, patch).unwrap();

    assert!(!row.contains_key("id"));
    assert!(!row.contains_key("created_at"));
    assert!(!row.contains_key("onClick"));
    assert_eq!(row["title"], json!("Renamed"));
    assert!(row.contains_key("updated_at"));
  }

  #[test]
  fn values_that_do_not_fit_are_rejected_before_writing() {
    let err = prepare_patch(&DOCUMENTS, Patch::new().set("size_bytes", 1.5)).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = prepare_patch(&KNOWLEDGE_BASES, Patch::new().set("allowed_users", json!([1])))
      .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = prepare_insert(
      &CHATS,
      fields(json!({ "owner_id": "u1", "pinned": "yes" })),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
  }
}
