//! Column descriptors for every logical collection.
//!
//! A [`Schema`] is the static shape of one collection: its table name, the
//! kind of every column and the default applied when `create` omits a field.
//! Backends use it to encode records into rows and to validate filters; the
//! record structs in this crate mirror it field for field.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::{Error, Result};

// ─── Columns ─────────────────────────────────────────────────────────────────

/// How a column is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
  Text,
  Integer,
  /// Stored as `0`/`1`.
  Bool,
  /// Stored as a fixed-width RFC 3339 UTC string.
  Timestamp,
  /// A JSON array serialized to text.
  Array,
  /// A JSON array of strings serialized to text.
  TextList,
  /// A JSON object serialized to text.
  Object,
}

impl ColumnKind {
  pub fn is_compound(self) -> bool { matches!(self, Self::Array | Self::TextList | Self::Object) }

  /// The value substituted when a compound column is missing or corrupt.
  pub fn empty_value(self) -> Value {
    match self {
      Self::Array | Self::TextList => Value::Array(Vec::new()),
      Self::Object => Value::Object(serde_json::Map::new()),
      _ => Value::Null,
    }
  }
}

/// What `create` does when a field is absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnDefault {
  /// Stored as NULL.
  Nullable,
  /// Absence is an error.
  Required,
  Text(&'static str),
  Integer(i64),
  Bool(bool),
  EmptyArray,
  EmptyObject,
}

impl ColumnDefault {
  /// The value to insert, or `None` when the field must be supplied.
  pub fn value(self) -> Option<Value> {
    match self {
      Self::Nullable => Some(Value::Null),
      Self::Required => None,
      Self::Text(s) => Some(Value::String(s.to_owned())),
      Self::Integer(i) => Some(Value::from(i)),
      Self::Bool(b) => Some(Value::Bool(b)),
      Self::EmptyArray => Some(Value::Array(Vec::new())),
      Self::EmptyObject => Some(Value::Object(serde_json::Map::new())),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Column {
  pub name:    &'static str,
  pub kind:    ColumnKind,
  pub default: ColumnDefault,
}

impl Column {
  pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
    Self { name, kind, default: ColumnDefault::Nullable }
  }

  pub const fn text(name: &'static str) -> Self { Self::new(name, ColumnKind::Text) }

  pub const fn integer(name: &'static str) -> Self {
    Self::new(name, ColumnKind::Integer)
  }

  pub const fn boolean(name: &'static str) -> Self { Self::new(name, ColumnKind::Bool) }

  pub const fn timestamp(name: &'static str) -> Self {
    Self::new(name, ColumnKind::Timestamp)
  }

  pub const fn array(name: &'static str) -> Self {
    Self::new(name, ColumnKind::Array).default(ColumnDefault::EmptyArray)
  }

  pub const fn text_list(name: &'static str) -> Self {
    Self::new(name, ColumnKind::TextList).default(ColumnDefault::EmptyArray)
  }

  pub const fn object(name: &'static str) -> Self {
    Self::new(name, ColumnKind::Object).default(ColumnDefault::EmptyObject)
  }

  pub const fn required(self) -> Self { self.default(ColumnDefault::Required) }

  pub const fn default(self, default: ColumnDefault) -> Self {
    Self { default, ..self }
  }

  /// Reject a value this column cannot store. `null` fits every column;
  /// integers must be whole and in `i64` range.
  pub fn check(&self, schema: &Schema, value: &Value) -> Result<()> {
    let fits = match (self.kind, value) {
      (_, Value::Null) => true,
      (ColumnKind::Text, Value::String(_)) => true,
      (ColumnKind::Integer, Value::Number(n)) => n.is_i64(),
      (ColumnKind::Bool, Value::Bool(_)) => true,
      (ColumnKind::Bool, Value::Number(n)) => matches!(n.as_i64(), Some(0 | 1)),
      (ColumnKind::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s).is_ok(),
      (ColumnKind::Array, Value::Array(_)) | (ColumnKind::Object, Value::Object(_)) => true,
      (ColumnKind::TextList, Value::Array(items)) => items.iter().all(Value::is_string),
      _ => false,
    };
    if fits {
      return Ok(());
    }
    Err(Error::InvalidArgument(format!(
      "{}.{} expects {:?}, got {value}",
      schema.name, self.name, self.kind
    )))
  }
}

/// Columns every table carries in addition to its own fields.
pub const SYSTEM_COLUMNS: &[Column] = &[
  Column::text("id").required(),
  Column::timestamp("created_at").required(),
  Column::timestamp("updated_at").required(),
];

/// Render a timestamp the way every backend stores it.
///
/// Nanosecond precision keeps the round trip lossless, and the fixed width
/// keeps lexical order equal to chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn timestamp_value(at: DateTime<Utc>) -> Value {
  Value::String(format_timestamp(at))
}

// ─── Schemas ─────────────────────────────────────────────────────────────────

/// Order used by `find` when the caller asks for none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultOrder {
  Insertion,
  /// Most recently updated first.
  RecentlyUpdated,
}

#[derive(Debug)]
pub struct Schema {
  /// Collection (and table) name.
  pub name:   &'static str,
  /// Singular noun used in error messages.
  pub entity: &'static str,
  pub fields: &'static [Column],
  pub order:  DefaultOrder,
}

impl Schema {
  /// System columns followed by the collection's own fields.
  pub fn columns(&self) -> impl Iterator<Item = &'static Column> {
    let fields = self.fields;
    SYSTEM_COLUMNS.iter().chain(fields.iter())
  }

  pub fn column(&self, name: &str) -> Option<&'static Column> {
    self.columns().find(|c| c.name == name)
  }

  /// Like [`Schema::column`], but an unknown name is an error.
  pub fn require_column(&self, name: &str) -> Result<&'static Column> {
    self.column(name).ok_or_else(|| {
      Error::InvalidArgument(format!(
        "unknown field {name:?} for collection {}",
        self.name
      ))
    })
  }
}

pub static USERS: Schema = Schema {
  name:   "users",
  entity: "user",
  fields: &[
    Column::text("name").required(),
    Column::text("email").required(),
    Column::text("role").default(ColumnDefault::Text("user")),
    Column::text("avatar_url"),
    Column::timestamp("last_active_at"),
  ],
  order:  DefaultOrder::Insertion,
};

pub static DOCUMENTS: Schema = Schema {
  name:   "documents",
  entity: "document",
  fields: &[
    Column::text("owner_id"),
    Column::text("folder_id"),
    Column::text("title").required(),
    Column::text("file_name"),
    Column::text("mime_type"),
    Column::integer("size_bytes").default(ColumnDefault::Integer(0)),
    Column::text("source").default(ColumnDefault::Text("upload")),
    Column::text("fingerprint").required(),
    Column::text("status").default(ColumnDefault::Text("pending")),
    Column::text("error"),
    Column::integer("chunk_count").default(ColumnDefault::Integer(0)),
    Column::object("metadata"),
  ],
  order:  DefaultOrder::RecentlyUpdated,
};

pub static SYSTEM_DOCUMENTS: Schema = Schema {
  name:   "system_documents",
  entity: "system document",
  fields: &[
    Column::text("owner_id"),
    Column::text("knowledge_base_id"),
    Column::text("title").required(),
    Column::text("file_name"),
    Column::text("mime_type"),
    Column::integer("size_bytes").default(ColumnDefault::Integer(0)),
    Column::text("source").default(ColumnDefault::Text("upload")),
    Column::text("fingerprint").required(),
    Column::text("status").default(ColumnDefault::Text("pending")),
    Column::text("error"),
    Column::integer("chunk_count").default(ColumnDefault::Integer(0)),
    Column::object("metadata"),
  ],
  order:  DefaultOrder::RecentlyUpdated,
};

pub static CHATS: Schema = Schema {
  name:   "chats",
  entity: "chat",
  fields: &[
    Column::text("owner_id").required(),
    Column::text("title").default(ColumnDefault::Text("New chat")),
    Column::text("persona_id"),
    Column::text("model"),
    Column::boolean("pinned").default(ColumnDefault::Bool(false)),
    Column::array("messages"),
  ],
  order:  DefaultOrder::RecentlyUpdated,
};

pub static PERSONAS: Schema = Schema {
  name:   "personas",
  entity: "persona",
  fields: &[
    Column::text("owner_id").required(),
    Column::text("name").required(),
    Column::text("description"),
    Column::text("system_prompt").default(ColumnDefault::Text("")),
    Column::boolean("is_active").default(ColumnDefault::Bool(false)),
  ],
  order:  DefaultOrder::Insertion,
};

pub static SETTINGS: Schema = Schema {
  name:   "settings",
  entity: "setting",
  fields: &[
    Column::text("key").required(),
    Column::text("value").default(ColumnDefault::Text("")),
  ],
  order:  DefaultOrder::Insertion,
};

pub static FOLDERS: Schema = Schema {
  name:   "folders",
  entity: "folder",
  fields: &[
    Column::text("owner_id").required(),
    Column::text("name").required(),
    Column::text("parent_id"),
    Column::text("path").default(ColumnDefault::Text("")),
  ],
  order:  DefaultOrder::Insertion,
};

pub static KNOWLEDGE_BASES: Schema = Schema {
  name:   "knowledge_bases",
  entity: "knowledge base",
  fields: &[
    Column::text("name").required(),
    Column::text("slug").required(),
    Column::text("storage_prefix").required(),
    Column::text("abbreviation").required(),
    Column::text("description"),
    Column::text("owner_id"),
    Column::text("access_mode").default(ColumnDefault::Text("restricted")),
    Column::text_list("allowed_roles"),
    Column::text_list("allowed_users"),
  ],
  order:  DefaultOrder::Insertion,
};

pub static USER_SETTINGS: Schema = Schema {
  name:   "user_settings",
  entity: "user settings",
  fields: &[
    Column::text("owner_id").required(),
    Column::text("default_persona_id"),
    Column::object("preferences"),
  ],
  order:  DefaultOrder::Insertion,
};

pub static FEEDBACK: Schema = Schema {
  name:   "feedback",
  entity: "feedback",
  fields: &[
    Column::text("owner_id").required(),
    Column::text("user_name").default(ColumnDefault::Text("")),
    Column::text("chat_id"),
    Column::text("message_id"),
    Column::integer("rating").default(ColumnDefault::Integer(0)),
    Column::text("comment"),
  ],
  order:  DefaultOrder::Insertion,
};

/// Every collection, in table-creation order.
pub static ALL: &[&Schema] = &[
  &USERS,
  &DOCUMENTS,
  &SYSTEM_DOCUMENTS,
  &CHATS,
  &PERSONAS,
  &SETTINGS,
  &FOLDERS,
  &KNOWLEDGE_BASES,
  &USER_SETTINGS,
  &FEEDBACK,
];
