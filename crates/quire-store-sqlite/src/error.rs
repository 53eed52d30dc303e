//! Error type for `quire-store-sqlite`.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] quire_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  /// The database stayed locked through every retry.
  #[error("database busy after {attempts} attempts")]
  Busy { attempts: u32 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  pub fn is_busy(&self) -> bool {
    match self {
      Self::Busy { .. } => true,
      Self::Database(e) => is_busy(e),
      _ => false,
    }
  }
}

fn sqlite_failure(e: &tokio_rusqlite::Error) -> Option<(&rusqlite::ffi::Error, Option<&str>)> {
  match e {
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(err, message)) => {
      Some((err, message.as_deref()))
    }
    _ => None,
  }
}

/// `SQLITE_BUSY` or `SQLITE_LOCKED`: another connection holds the lock.
pub(crate) fn is_busy(e: &tokio_rusqlite::Error) -> bool {
  sqlite_failure(e).is_some_and(|(err, _)| {
    matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
  })
}

/// Split SQLite's `"UNIQUE constraint failed: users.email"` into the table
/// and column it names.
fn constraint_target(message: &str) -> (Option<String>, Option<String>) {
  let detail = message.split_once(": ").map_or(message, |(_, d)| d);
  let first = detail.split(',').next().unwrap_or(detail).trim();
  match first.split_once('.') {
    Some((table, column)) => (Some(table.to_owned()), Some(column.to_owned())),
    None => (None, None),
  }
}

impl From<Error> for quire_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(e) => e,
      Error::Busy { attempts } => Self::BackendBusy { attempts },
      Error::Database(e) => match sqlite_failure(&e) {
        Some((err, message)) if err.code == ErrorCode::ConstraintViolation => {
          let message = message.unwrap_or("constraint failed").to_owned();
          let (table, field) = constraint_target(&message);
          Self::ConstraintViolation {
            collection: table.unwrap_or_else(|| "unknown".to_owned()),
            field,
            message,
          }
        }
        _ => Self::Backend(Box::new(e)),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constraint_messages_name_table_and_column() {
    assert_eq!(
      constraint_target("UNIQUE constraint failed: users.email"),
      (Some("users".into()), Some("email".into()))
    );
    assert_eq!(
      constraint_target("UNIQUE constraint failed: chats.id, chats.owner_id"),
      (Some("chats".into()), Some("id".into()))
    );
    assert_eq!(constraint_target("CHECK constraint failed: pinned_bool"), (None, None));
  }

  #[test]
  fn busy_codes_are_recognised() {
    let busy = tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
      None,
    ));
    assert!(is_busy(&busy));
    assert!(Error::Database(busy).is_busy());

    let other = tokio_rusqlite::Error::Rusqlite(rusqlite::Error::QueryReturnedNoRows);
    assert!(!is_busy(&other));
  }

  #[test]
  fn unique_violation_maps_to_core_error() {
    let err = Error::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
      Some("UNIQUE constraint failed: settings.key".into()),
    )));
    match quire_core::Error::from(err) {
      quire_core::Error::ConstraintViolation { collection, field, .. } => {
        assert_eq!(collection, "settings");
        assert_eq!(field.as_deref(), Some("key"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }
}
