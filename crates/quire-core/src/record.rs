//! The [`Record`] trait and the flat record types that need no dedicated
//! store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::schema::{self, Schema};

/// A typed record stored in one collection.
///
/// Field names of the implementing struct must match the column names of
/// [`Record::SCHEMA`].
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
  const SCHEMA: &'static Schema;

  /// Fields kept consistent by the record's own store. A plain
  /// [`Collection`](crate::Collection) refuses writes that touch them.
  const MANAGED_FIELDS: &'static [&'static str] = &[];

  fn id(&self) -> &str;
}

// ─── User ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id:             String,
  pub name:           String,
  pub email:          String,
  pub role:           String,
  pub avatar_url:     Option<String>,
  pub last_active_at: Option<DateTime<Utc>>,
  pub created_at:     DateTime<Utc>,
  pub updated_at:     DateTime<Utc>,
}

impl Record for User {
  const SCHEMA: &'static Schema = &schema::USERS;

  fn id(&self) -> &str { &self.id }
}

/// Input for creating a [`User`]; `role` defaults to `"user"`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewUser {
  pub name:       String,
  pub email:      String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub role:       Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
}

impl NewUser {
  pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
    Self { name: name.into(), email: email.into(), ..Default::default() }
  }
}

// ─── Feedback ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
  pub id:         String,
  pub owner_id:   String,
  /// Copied from the user at submission time.
  pub user_name:  String,
  pub chat_id:    Option<String>,
  pub message_id: Option<String>,
  pub rating:     i64,
  pub comment:    Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Record for Feedback {
  const SCHEMA: &'static Schema = &schema::FEEDBACK;

  fn id(&self) -> &str { &self.id }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewFeedback {
  pub owner_id:   String,
  pub user_name:  String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub chat_id:    Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message_id: Option<String>,
  pub rating:     i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub comment:    Option<String>,
}
