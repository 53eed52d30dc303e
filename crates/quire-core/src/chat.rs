//! Chats and the message sequence embedded in each one.
//!
//! Messages live inside the chat record's `messages` column. Every sequence
//! operation reads the whole chat, edits the list and writes it back; a
//! process-wide lock keeps two concurrent edits from losing each other's
//! messages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
  Error, Result,
  backend::Backend,
  collection::Collection,
  id,
  query::{Filter, Patch},
  record::Record,
  schema::{self, Schema},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
  System,
  User,
  Assistant,
}

impl MessageRole {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::System => "system",
      Self::User => "user",
      Self::Assistant => "assistant",
    }
  }
}

impl From<MessageRole> for Value {
  fn from(role: MessageRole) -> Self { Value::String(role.as_str().to_owned()) }
}

/// A source passage the assistant cited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
  pub document_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title:       Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub snippet:     Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub score:       Option<f64>,
}

/// Token accounting for one model response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Usage {
  pub prompt_tokens:     u64,
  pub completion_tokens: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cost:              Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub id:         String,
  pub role:       MessageRole,
  pub content:    String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub citations:  Option<Vec<Citation>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub usage:      Option<Usage>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
  pub id:         String,
  pub owner_id:   String,
  pub title:      String,
  pub persona_id: Option<String>,
  pub model:      Option<String>,
  pub pinned:     bool,
  #[serde(default, deserialize_with = "lenient_messages")]
  pub messages:   Vec<ChatMessage>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Record for Chat {
  const SCHEMA: &'static Schema = &schema::CHATS;

  fn id(&self) -> &str { &self.id }
}

/// Keep every well-formed message and drop the rest. A missing or non-array
/// sequence reads as empty.
fn lenient_messages<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<ChatMessage>, D::Error> {
  let entries = match Value::deserialize(de)? {
    Value::Array(entries) => entries,
    Value::Null => return Ok(Vec::new()),
    other => {
      warn!(found = %other, "chat messages are not a list, treating as empty");
      return Ok(Vec::new());
    }
  };

  Ok(
    entries
      .into_iter()
      .enumerate()
      .filter_map(|(index, entry)| match serde_json::from_value(entry) {
        Ok(message) => Some(message),
        Err(e) => {
          warn!(index, error = %e, "skipping malformed chat message");
          None
        }
      })
      .collect(),
  )
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewChat {
  pub owner_id:   String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title:      Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub persona_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub model:      Option<String>,
}

impl NewChat {
  pub fn new(owner_id: impl Into<String>) -> Self {
    Self { owner_id: owner_id.into(), ..Default::default() }
  }
}

/// A message to append. `id` and `created_at` are filled in when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
  pub id:         Option<String>,
  pub role:       MessageRole,
  pub content:    String,
  pub citations:  Option<Vec<Citation>>,
  pub usage:      Option<Usage>,
  pub created_at: Option<DateTime<Utc>>,
}

impl NewMessage {
  pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
    Self {
      id: None,
      role,
      content: content.into(),
      citations: None,
      usage: None,
      created_at: None,
    }
  }

  pub fn user(content: impl Into<String>) -> Self { Self::new(MessageRole::User, content) }

  pub fn assistant(content: impl Into<String>) -> Self {
    Self::new(MessageRole::Assistant, content)
  }

  fn into_message(self) -> ChatMessage {
    ChatMessage {
      id:         self.id.unwrap_or_else(id::generate),
      role:       self.role,
      content:    self.content,
      citations:  self.citations,
      usage:      self.usage,
      created_at: self.created_at.unwrap_or_else(Utc::now),
    }
  }
}

/// Contiguous slice of `messages` ending `offset` entries before the newest
/// one and holding at most `count` entries, oldest first.
pub fn window_of(messages: &[ChatMessage], count: usize, offset: usize) -> &[ChatMessage] {
  let end = messages.len().saturating_sub(offset);
  let start = end.saturating_sub(count);
  &messages[start..end]
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChatStore {
  chats:         Collection<Chat>,
  sequence_lock: Arc<Mutex<()>>,
}

impl ChatStore {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self {
      chats:         Collection::new(backend),
      sequence_lock: Arc::new(Mutex::new(())),
    }
  }

  pub fn collection(&self) -> &Collection<Chat> { &self.chats }

  pub async fn create(&self, input: &NewChat) -> Result<Chat> { self.chats.create(input).await }

  /// Chats of one owner, most recently updated first.
  pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Chat>> {
    self.chats.find(&Filter::new().eq("owner_id", owner_id)).await
  }

  /// The full sequence; empty when the chat does not exist.
  pub async fn messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
    Ok(
      self
        .chats
        .find_by_id(chat_id)
        .await?
        .map(|chat| chat.messages)
        .unwrap_or_default(),
    )
  }

  /// Append `message` to the end of the chat's sequence and return it as
  /// stored.
  pub async fn append(&self, chat_id: &str, message: NewMessage) -> Result<ChatMessage> {
    let message = message.into_message();
    let _guard = self.sequence_lock.lock().await;

    let mut chat = self.chats.get(chat_id).await?;
    if chat.messages.iter().any(|m| m.id == message.id) {
      return Err(Error::ConstraintViolation {
        collection: schema::CHATS.name.to_owned(),
        field:      Some("messages.id".to_owned()),
        message:    format!("chat {chat_id} already holds message {}", message.id),
      });
    }
    chat.messages.push(message.clone());
    self.store_messages(chat_id, &chat.messages).await?;

    debug!(chat_id, message_id = %message.id, len = chat.messages.len(), "appended message");
    Ok(message)
  }

  /// Remove the message with `message_id`. Returns whether one was removed.
  pub async fn remove(&self, chat_id: &str, message_id: &str) -> Result<bool> {
    let _guard = self.sequence_lock.lock().await;

    let mut chat = self.chats.get(chat_id).await?;
    let before = chat.messages.len();
    chat.messages.retain(|m| m.id != message_id);
    if chat.messages.len() == before {
      return Ok(false);
    }
    self.store_messages(chat_id, &chat.messages).await?;

    debug!(chat_id, message_id, "removed message");
    Ok(true)
  }

  /// At most `count` messages ending `offset` entries before the newest,
  /// in chronological order. Reads only.
  pub async fn window(
    &self,
    chat_id: &str,
    count: usize,
    offset: usize,
  ) -> Result<Vec<ChatMessage>> {
    let messages = self.messages(chat_id).await?;
    Ok(window_of(&messages, count, offset).to_vec())
  }

  async fn store_messages(&self, chat_id: &str, messages: &[ChatMessage]) -> Result<()> {
    let patch = Patch::new().set("messages", serde_json::to_value(messages)?);
    self.chats.update(chat_id, patch).await.map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn message(id: &str) -> ChatMessage {
    ChatMessage {
      id:         id.to_owned(),
      role:       MessageRole::User,
      content:    format!("message {id}"),
      citations:  None,
      usage:      None,
      created_at: Utc::now(),
    }
  }

  fn ids(messages: &[ChatMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
  }

  #[test]
  fn window_counts_back_from_newest() {
    let all: Vec<_> = ["a", "b", "c", "d", "e"].into_iter().map(message).collect();

    assert_eq!(ids(window_of(&all, 1, 0)), ["e"]);
    assert_eq!(ids(window_of(&all, 2, 0)), ["d", "e"]);
    assert_eq!(ids(window_of(&all, 2, 1)), ["c", "d"]);
    assert_eq!(ids(window_of(&all, 10, 3)), ["a", "b"]);
    assert!(window_of(&all, 3, 5).is_empty());
    assert!(window_of(&all, 0, 0).is_empty());
  }

  #[test]
  fn malformed_messages_are_skipped() {
    let chat: Chat = serde_json::from_value(json!({
      "id": "c1",
      "owner_id": "u1",
      "title": "t",
      "persona_id": null,
      "model": null,
      "pinned": false,
      "messages": [
        { "id": "m1", "role": "user", "content": "hi", "created_at": "2024-01-01T00:00:00Z" },
        { "id": "m2", "role": "robot", "content": "?" },
        42,
      ],
      "created_at": "2024-01-01T00:00:00Z",
      "updated_at": "2024-01-01T00:00:00Z",
    }))
    .unwrap();

    assert_eq!(ids(&chat.messages), ["m1"]);
  }

  #[test]
  fn non_list_sequence_reads_as_empty() {
    let chat: Chat = serde_json::from_value(json!({
      "id": "c1",
      "owner_id": "u1",
      "title": "t",
      "persona_id": null,
      "model": null,
      "pinned": false,
      "messages": { "oops": true },
      "created_at": "2024-01-01T00:00:00Z",
      "updated_at": "2024-01-01T00:00:00Z",
    }))
    .unwrap();
    assert!(chat.messages.is_empty());
  }

  #[test]
  fn new_message_gets_identifier_and_time() {
    let message = NewMessage::user("hello").into_message();
    assert!(id::is_valid(&message.id));
    assert_eq!(message.role, MessageRole::User);
  }
}
