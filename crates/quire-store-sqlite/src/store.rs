//! [`SqliteStore`], the SQLite implementation of [`Backend`].

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use rusqlite::TransactionBehavior;
use tracing::{debug, info, warn};

use quire_core::{
  Backend, DeleteScope, Fields, Filter, FindOptions, WriteOp, schema::Schema,
};

use crate::{
  Error, Result,
  error::is_busy,
  query::{self, Statement},
  retry::RetryPolicy,
  schema::{SCHEMA, SCHEMA_VERSION},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A quire record store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:  tokio_rusqlite::Connection,
  retry: RetryPolicy,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path, RetryPolicy::default()).await
  }

  pub async fn open_with(path: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self> {
    let path = path.as_ref().to_owned();
    let conn = tokio_rusqlite::Connection::open(&path).await?;
    let store = Self { conn, retry };
    store.init_schema().await?;
    info!(path = %path.display(), "opened sqlite store");
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, retry: RetryPolicy::default() };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let version = self
      .run(|conn| {
        // Waiting is left entirely to the retry policy.
        conn.busy_timeout(Duration::ZERO)?;
        conn.execute_batch(SCHEMA)?;
        conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
      })
      .await?;
    debug!(version, expected = SCHEMA_VERSION, "schema ready");
    Ok(())
  }

  /// Run `op` on the connection thread, retrying while the database is
  /// locked by another connection.
  async fn run<F, R>(&self, op: F) -> Result<R>
  where
    F: Fn(&mut rusqlite::Connection) -> rusqlite::Result<R> + Clone + Send + 'static,
    R: Send + 'static,
  {
    let mut attempt = 1;
    loop {
      let op = op.clone();
      match self.conn.call(move |conn| Ok(op(conn)?)).await {
        Ok(value) => return Ok(value),
        Err(e) if is_busy(&e) => {
          if attempt >= self.retry.max_attempts {
            warn!(attempts = attempt, "database still busy, giving up");
            return Err(Error::Busy { attempts: attempt });
          }
          let delay = self.retry.delay_for(attempt);
          warn!(attempt, delay_ms = delay.as_millis() as u64, "database busy, retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(e) => return Err(e.into()),
      }
    }
  }

  #[cfg(test)]
  pub(crate) fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }
}

// ─── Backend impl ────────────────────────────────────────────────────────────

#[async_trait]
impl Backend for SqliteStore {
  fn name(&self) -> &'static str { "sqlite" }

  async fn find(
    &self,
    schema: &'static Schema,
    filter: &Filter,
    options: &FindOptions,
  ) -> quire_core::Result<Vec<Fields>> {
    let stmt = query::select(schema, filter, options)?;
    let rows = self.run(move |conn| stmt.query_rows(conn, schema)).await?;
    debug!(collection = schema.name, rows = rows.len(), "find");
    Ok(rows)
  }

  async fn count(&self, schema: &'static Schema, filter: &Filter) -> quire_core::Result<u64> {
    let stmt = query::count(schema, filter)?;
    let n = self.run(move |conn| stmt.query_i64(conn)).await?;
    Ok(n.map_or(0, |n| u64::try_from(n).unwrap_or_default()))
  }

  async fn insert(&self, schema: &'static Schema, fields: Fields) -> quire_core::Result<Fields> {
    let stmt = query::insert(schema, &fields)?;
    let row = self
      .run(move |conn| {
        stmt.execute(conn)?;
        let seq = conn.last_insert_rowid();
        query::select_by_seq(schema, seq)
          .query_rows(conn, schema)?
          .pop()
          .ok_or(rusqlite::Error::QueryReturnedNoRows)
      })
      .await?;
    debug!(collection = schema.name, id = ?row.get("id"), "insert");
    Ok(row)
  }

  async fn update_one(
    &self,
    schema: &'static Schema,
    filter: &Filter,
    patch: Fields,
  ) -> quire_core::Result<Option<Fields>> {
    let locate = query::locate_first(schema, filter)?;
    let update = query::update_by_seq(schema, &patch)?;

    let row = self
      .run(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(seq) = locate.query_i64(&tx)? else {
          return Ok(None);
        };
        let mut update = update.clone();
        update.params.push(seq.into());
        update.execute(&tx)?;
        let row = query::select_by_seq(schema, seq).query_rows(&tx, schema)?.pop();
        tx.commit()?;
        Ok(row)
      })
      .await?;
    debug!(collection = schema.name, matched = row.is_some(), "update_one");
    Ok(row)
  }

  async fn delete(
    &self,
    schema: &'static Schema,
    filter: &Filter,
    scope: DeleteScope,
  ) -> quire_core::Result<u64> {
    let stmt = query::delete(schema, filter, scope)?;
    let removed = self.run(move |conn| stmt.execute(conn)).await?;
    debug!(collection = schema.name, ?scope, removed, "delete");
    Ok(removed as u64)
  }

  async fn apply(&self, ops: Vec<WriteOp>) -> quire_core::Result<Vec<u64>> {
    let statements = ops
      .iter()
      .map(|op| match op {
        WriteOp::Update { schema, filter, patch } => query::update_many(schema, filter, patch),
        WriteOp::Delete { schema, filter } => query::delete(schema, filter, DeleteScope::Many),
      })
      .collect::<quire_core::Result<Vec<Statement>>>()?;

    let counts = self
      .run(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let counts = statements
          .iter()
          .map(|stmt| stmt.execute(&tx).map(|n| n as u64))
          .collect::<rusqlite::Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(counts)
      })
      .await?;
    debug!(ops = counts.len(), rows = counts.iter().sum::<u64>(), "apply");
    Ok(counts)
  }
}
