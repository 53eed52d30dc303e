//! Filters, patches and find options.
//!
//! A [`Filter`] is a conjunction of equality clauses. A field that is not
//! mentioned imposes no constraint; an explicit `null` matches NULL. A
//! [`Patch`] is the set of fields an update writes.

use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result, schema::Schema};

/// A logical record in its untyped form: field name to JSON value.
pub type Fields = serde_json::Map<String, Value>;

/// Serialize `value` into [`Fields`]. Anything but a JSON object is rejected.
pub fn to_fields<T: Serialize + ?Sized>(value: &T) -> Result<Fields> {
  match serde_json::to_value(value)? {
    Value::Object(fields) => Ok(fields),
    other => Err(Error::InvalidArgument(format!(
      "expected an object, got {}",
      kind_name(&other)
    ))),
  }
}

fn kind_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

// ─── Filter ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
  clauses: Vec<(String, Value)>,
}

impl Filter {
  /// The empty filter matches every record.
  pub fn new() -> Self { Self::default() }

  pub fn by_id(id: impl Into<String>) -> Self { Self::new().eq("id", id.into()) }

  /// Require `field == value`. A later clause on the same field replaces an
  /// earlier one.
  pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    let field = field.into();
    let value = value.into();
    match self.clauses.iter_mut().find(|(f, _)| *f == field) {
      Some(clause) => clause.1 = value,
      None => self.clauses.push((field, value)),
    }
    self
  }

  /// Add a clause only when `value` is present.
  pub fn eq_opt<V: Into<Value>>(self, field: impl Into<String>, value: Option<V>) -> Self {
    match value {
      Some(v) => self.eq(field, v),
      None => self,
    }
  }

  pub fn is_null(self, field: impl Into<String>) -> Self { self.eq(field, Value::Null) }

  pub fn clauses(&self) -> &[(String, Value)] { &self.clauses }

  pub fn is_empty(&self) -> bool { self.clauses.is_empty() }

  /// The value required for `field`, if the filter constrains it.
  pub fn get(&self, field: &str) -> Option<&Value> {
    self.clauses.iter().find(|(f, _)| f == field).map(|(_, v)| v)
  }

  /// Reject clauses naming fields the collection does not have.
  pub fn validate(&self, schema: &Schema) -> Result<()> {
    for (field, _) in &self.clauses {
      schema.require_column(field)?;
    }
    Ok(())
  }
}

impl From<Fields> for Filter {
  fn from(fields: Fields) -> Self {
    Self { clauses: fields.into_iter().collect() }
  }
}

// ─── Patch ───────────────────────────────────────────────────────────────────

/// Fields written by an update.
///
/// Built either field by field or from any serializable value. Serialized
/// `Option::None` fields marked `skip_serializing_if`, `#[serde(skip)]`
/// members and keys that are not columns of the target collection never
/// reach storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
  fields: Fields,
}

impl Patch {
  pub fn new() -> Self { Self::default() }

  pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.fields.insert(field.into(), value.into());
    self
  }

  pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
    Ok(Self { fields: to_fields(value)? })
  }

  pub fn get(&self, field: &str) -> Option<&Value> { self.fields.get(field) }

  pub fn remove(&mut self, field: &str) -> Option<Value> { self.fields.remove(field) }

  pub fn is_empty(&self) -> bool { self.fields.is_empty() }

  pub fn fields(&self) -> &Fields { &self.fields }

  pub fn into_fields(self) -> Fields { self.fields }
}

impl From<Fields> for Patch {
  fn from(fields: Fields) -> Self { Self { fields } }
}

// ─── Find options ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Ascending,
  Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
  pub field:     String,
  pub direction: Direction,
}

/// Sorting and paging for `find`. Without a sort, the collection's
/// [`DefaultOrder`](crate::schema::DefaultOrder) applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
  pub sort:  Option<Sort>,
  pub limit: Option<usize>,
  pub skip:  Option<usize>,
}

impl FindOptions {
  pub fn new() -> Self { Self::default() }

  pub fn sort_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
    self.sort = Some(Sort { field: field.into(), direction });
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn skip(mut self, skip: usize) -> Self {
    self.skip = Some(skip);
    self
  }

  pub fn validate(&self, schema: &Schema) -> Result<()> {
    if let Some(sort) = &self.sort {
      schema.require_column(&sort.field)?;
    }
    Ok(())
  }
}
