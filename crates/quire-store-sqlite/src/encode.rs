//! Encoding and decoding between logical record fields and SQLite values.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings so lexical order is
//! chronological order. Array and object fields are stored as canonical JSON
//! text (object keys sorted). Booleans are stored as `0`/`1`.

use chrono::{DateTime, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;
use tracing::{debug, warn};

use quire_core::{
  Error, Fields, Result,
  schema::{Column, ColumnKind, Schema, format_timestamp},
};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { format_timestamp(dt) }

pub fn decode_dt(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

// ─── Encode ──────────────────────────────────────────────────────────────────

/// Re-key every object in `value` in sorted order.
pub fn canonical_json(value: &Value) -> String {
  fn canonical(value: &Value) -> Value {
    match value {
      Value::Object(map) => {
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        Value::Object(
          entries
            .into_iter()
            .map(|(k, v)| (k.clone(), canonical(v)))
            .collect(),
        )
      }
      Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
      other => other.clone(),
    }
  }
  canonical(value).to_string()
}

/// Encode one field for `column`. `null` is stored as NULL for every kind;
/// a value of the wrong kind is an `InvalidArgument` error.
pub fn encode_value(schema: &Schema, column: &Column, value: &Value) -> Result<SqlValue> {
  column.check(schema, value)?;

  let encoded = match (column.kind, value) {
    (_, Value::Null) => SqlValue::Null,
    (ColumnKind::Text, Value::String(s)) => SqlValue::Text(s.clone()),
    (ColumnKind::Integer | ColumnKind::Bool, Value::Number(n)) => {
      SqlValue::Integer(n.as_i64().unwrap_or_default())
    }
    (ColumnKind::Bool, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
    (ColumnKind::Timestamp, Value::String(s)) => match decode_dt(s) {
      Some(dt) => SqlValue::Text(encode_dt(dt)),
      None => return Err(mismatch(schema, column, value)),
    },
    (kind, Value::Array(_) | Value::Object(_)) if kind.is_compound() => {
      SqlValue::Text(canonical_json(value))
    }
    _ => return Err(mismatch(schema, column, value)),
  };
  Ok(encoded)
}

fn mismatch(schema: &Schema, column: &Column, value: &Value) -> Error {
  Error::InvalidArgument(format!(
    "{}.{} expects {:?}, got {value}",
    schema.name, column.name, column.kind
  ))
}

/// Encode every field that is a column of `schema`, in the order given.
/// Keys that are not columns are skipped.
pub fn encode_fields(schema: &Schema, fields: &Fields) -> Result<Vec<(&'static str, SqlValue)>> {
  let mut encoded = Vec::with_capacity(fields.len());
  for (name, value) in fields {
    let Some(column) = schema.column(name) else {
      debug!(collection = schema.name, field = %name, "skipping non-column field");
      continue;
    };
    encoded.push((column.name, encode_value(schema, column, value)?));
  }
  Ok(encoded)
}

// ─── Decode ──────────────────────────────────────────────────────────────────

/// Decode one stored value. Never fails: a compound column holding NULL or
/// unparseable text decodes as its empty value, a string list drops entries
/// that are not strings, and a real in an integer column is truncated.
pub fn decode_value(schema: &Schema, column: &Column, raw: ValueRef<'_>) -> Value {
  match (column.kind, raw) {
    (kind, ValueRef::Null) => kind.empty_value(),

    (ColumnKind::Bool, ValueRef::Integer(i)) => Value::Bool(i != 0),
    (_, ValueRef::Integer(i)) => match column.kind {
      ColumnKind::Text => Value::String(i.to_string()),
      _ => Value::from(i),
    },
    (ColumnKind::Integer, ValueRef::Real(f)) => {
      warn!(
        collection = schema.name,
        field = column.name,
        "stored real in integer column, truncating"
      );
      Value::from(f as i64)
    }
    (ColumnKind::Text, ValueRef::Real(f)) => Value::String(f.to_string()),
    (_, ValueRef::Real(f)) => Value::from(f),

    (kind, ValueRef::Text(bytes)) if kind.is_compound() => {
      let parsed = std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| serde_json::from_str::<Value>(s).ok());
      match parsed {
        Some(v @ Value::Array(_)) if kind == ColumnKind::Array => v,
        Some(Value::Array(items)) if kind == ColumnKind::TextList => {
          let total = items.len();
          let strings: Vec<Value> = items.into_iter().filter(Value::is_string).collect();
          if strings.len() < total {
            warn!(
              collection = schema.name,
              field = column.name,
              dropped = total - strings.len(),
              "skipping non-string list entries"
            );
          }
          Value::Array(strings)
        }
        Some(v @ Value::Object(_)) if kind == ColumnKind::Object => v,
        _ => {
          warn!(
            collection = schema.name,
            field = column.name,
            "stored value is not valid {:?} JSON, using empty value",
            kind
          );
          kind.empty_value()
        }
      }
    }
    (_, ValueRef::Text(bytes)) => Value::String(String::from_utf8_lossy(bytes).into_owned()),

    (_, ValueRef::Blob(_)) => {
      warn!(collection = schema.name, field = column.name, "unexpected blob, using null");
      column.kind.empty_value()
    }
  }
}

/// Decode a row whose columns are `schema.columns()` in order.
pub fn decode_row(schema: &Schema, row: &rusqlite::Row<'_>) -> rusqlite::Result<Fields> {
  let mut fields = Fields::new();
  for (index, column) in schema.columns().enumerate() {
    let raw = row.get_ref(index)?;
    fields.insert(column.name.to_owned(), decode_value(schema, column, raw));
  }
  Ok(fields)
}
