//! Document records (personal and shared/system) and their store.
//!
//! Both variants carry a content fingerprint used for duplicate detection and
//! a processing status written by the ingestion pipeline.

use std::{fmt, marker::PhantomData, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
  Error, Result,
  backend::Backend,
  collection::Collection,
  query::{Fields, Filter, Patch},
  record::Record,
  schema::{self, Schema},
};

// ─── Enums ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
  #[default]
  Pending,
  Processing,
  Completed,
  Failed,
}

impl ProcessingStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Processing => "processing",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }

  /// Allowed moves: pending → processing → completed | failed, and back to
  /// pending from a finished state to reprocess.
  pub fn can_transition_to(self, next: Self) -> bool {
    use ProcessingStatus::*;
    matches!(
      (self, next),
      (Pending, Processing)
        | (Processing, Completed)
        | (Processing, Failed)
        | (Failed, Pending)
        | (Completed, Pending)
    )
  }
}

impl fmt::Display for ProcessingStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl From<ProcessingStatus> for Value {
  fn from(status: ProcessingStatus) -> Self { Value::String(status.as_str().to_owned()) }
}

/// Where a document's content came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSource {
  #[default]
  Upload,
  Url,
  Manual,
}

impl DocumentSource {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Upload => "upload",
      Self::Url => "url",
      Self::Manual => "manual",
    }
  }
}

impl From<DocumentSource> for Value {
  fn from(source: DocumentSource) -> Self { Value::String(source.as_str().to_owned()) }
}

/// SHA-256 of `content`, hex encoded. This is the fingerprint used for duplicate
/// detection.
pub fn content_fingerprint(content: &[u8]) -> String { hex::encode(Sha256::digest(content)) }

// ─── Records ─────────────────────────────────────────────────────────────────

/// A document uploaded by (or on behalf of) one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id:          String,
  pub owner_id:    Option<String>,
  pub folder_id:   Option<String>,
  pub title:       String,
  pub file_name:   Option<String>,
  pub mime_type:   Option<String>,
  pub size_bytes:  i64,
  pub source:      DocumentSource,
  pub fingerprint: String,
  pub status:      ProcessingStatus,
  pub error:       Option<String>,
  pub chunk_count: i64,
  pub metadata:    Fields,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

impl Record for Document {
  const SCHEMA: &'static Schema = &schema::DOCUMENTS;

  fn id(&self) -> &str { &self.id }
}

/// A document shared through a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDocument {
  pub id:                String,
  pub owner_id:          Option<String>,
  pub knowledge_base_id: Option<String>,
  pub title:             String,
  pub file_name:         Option<String>,
  pub mime_type:         Option<String>,
  pub size_bytes:        i64,
  pub source:            DocumentSource,
  pub fingerprint:       String,
  pub status:            ProcessingStatus,
  pub error:             Option<String>,
  pub chunk_count:       i64,
  pub metadata:          Fields,
  pub created_at:        DateTime<Utc>,
  pub updated_at:        DateTime<Utc>,
}

impl Record for SystemDocument {
  const SCHEMA: &'static Schema = &schema::SYSTEM_DOCUMENTS;

  fn id(&self) -> &str { &self.id }
}

/// Accessors shared by both document variants.
pub trait DocumentRecord: Record {
  fn status(&self) -> ProcessingStatus;
}

impl DocumentRecord for Document {
  fn status(&self) -> ProcessingStatus { self.status }
}

impl DocumentRecord for SystemDocument {
  fn status(&self) -> ProcessingStatus { self.status }
}

/// Input for creating either document variant. Set `folder_id` for personal
/// documents and `knowledge_base_id` for system ones; the other is dropped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewDocument {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub owner_id:          Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub folder_id:         Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub knowledge_base_id: Option<String>,
  pub title:             String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file_name:         Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mime_type:         Option<String>,
  pub size_bytes:        i64,
  pub source:            DocumentSource,
  pub fingerprint:       String,
  pub status:            ProcessingStatus,
  pub metadata:          Fields,
}

impl NewDocument {
  pub fn new(title: impl Into<String>, fingerprint: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      fingerprint: fingerprint.into(),
      ..Default::default()
    }
  }

  pub fn owned_by(mut self, owner_id: impl Into<String>) -> Self {
    self.owner_id = Some(owner_id.into());
    self
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Document operations shared by both variants.
pub struct DocumentStore<D> {
  documents: Collection<D>,
  _record:   PhantomData<fn() -> D>,
}

impl<D> Clone for DocumentStore<D> {
  fn clone(&self) -> Self {
    Self { documents: self.documents.clone(), _record: PhantomData }
  }
}

impl<D: DocumentRecord> DocumentStore<D> {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self { documents: Collection::new(backend), _record: PhantomData }
  }

  pub fn collection(&self) -> &Collection<D> { &self.documents }

  pub async fn create(&self, input: &NewDocument) -> Result<D> {
    if input.fingerprint.is_empty() {
      return Err(Error::InvalidArgument("document fingerprint must not be empty".into()));
    }
    self.documents.create(input).await
  }

  /// The existing document with the same fingerprint, if any. Without an
  /// owner the lookup spans every owner.
  pub async fn find_duplicate(&self, owner_id: Option<&str>, fingerprint: &str) -> Result<Option<D>> {
    let filter = Filter::new()
      .eq_opt("owner_id", owner_id)
      .eq("fingerprint", fingerprint);
    self.documents.find_one(&filter).await
  }

  pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<D>> {
    self.documents.find(&Filter::new().eq("owner_id", owner_id)).await
  }

  pub async fn list_by_status(&self, status: ProcessingStatus) -> Result<Vec<D>> {
    self.documents.find(&Filter::new().eq("status", status)).await
  }

  /// Move a document to `status`, rejecting transitions the pipeline never
  /// makes. `error` is stored for failures and cleared otherwise.
  pub async fn set_status(
    &self,
    id: &str,
    status: ProcessingStatus,
    error: Option<&str>,
  ) -> Result<D> {
    let current = self.documents.get(id).await?.status();
    if current != status && !current.can_transition_to(status) {
      return Err(Error::InvalidArgument(format!(
        "cannot move {} {id} from {current} to {status}",
        D::SCHEMA.entity
      )));
    }

    let error = match status {
      ProcessingStatus::Failed => error.map(|e| Value::String(e.to_owned())).unwrap_or(Value::Null),
      _ => Value::Null,
    };
    let patch = Patch::new().set("status", status).set("error", error);

    debug!(collection = D::SCHEMA.name, id, %status, "document status change");
    self.documents.update(id, patch).await
  }
}
