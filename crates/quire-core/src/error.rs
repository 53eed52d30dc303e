//! Error types for `quire-core`.
//!
//! Every backend converts its native failures into [`Error`] at the
//! [`Backend`](crate::backend::Backend) boundary, so callers only ever match
//! on this one enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// An operation that expected a matching record found none.
  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  /// A unique or not-null constraint rejected the write.
  #[error("constraint violation on {collection}: {message}")]
  ConstraintViolation {
    collection: String,
    /// The offending column, when the backend can name it.
    field:      Option<String>,
    message:    String,
  },

  /// A hierarchy would become (or already is) inconsistent.
  #[error("structural integrity error: {0}")]
  StructuralIntegrity(String),

  #[error("backend still busy after {attempts} attempts")]
  BackendBusy { attempts: u32 },

  #[error(
    "could not generate a unique identifier for {collection} after \
     {attempts} attempts"
  )]
  IdentifierExhausted {
    collection: &'static str,
    attempts:   u32,
  },

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// A stored row could not be turned into its record type.
  #[error("failed to decode {collection} record: {source}")]
  Decode {
    collection: &'static str,
    #[source]
    source:     serde_json::Error,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
    Self::NotFound { entity, id: id.into() }
  }

  pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
