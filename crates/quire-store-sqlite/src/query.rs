//! SQL statement construction.
//!
//! Table and column names come only from static [`Schema`]s and are spliced
//! into the SQL text; every value is bound as a positional parameter.

use rusqlite::{Connection, params_from_iter, types::Value as SqlValue};

use quire_core::{
  DeleteScope, Error, Fields, Filter, FindOptions, Result,
  query::Direction,
  schema::{DefaultOrder, Schema},
};

use crate::encode::{decode_row, encode_fields, encode_value};

/// SQL text plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
  pub sql:    String,
  pub params: Vec<SqlValue>,
}

impl Statement {
  pub fn execute(&self, conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(&self.sql, params_from_iter(self.params.iter()))
  }

  pub fn query_rows(&self, conn: &Connection, schema: &Schema) -> rusqlite::Result<Vec<Fields>> {
    let mut stmt = conn.prepare_cached(&self.sql)?;
    let rows = stmt
      .query_map(params_from_iter(self.params.iter()), |row| decode_row(schema, row))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  /// The single integer the statement selects, or `None` for no row.
  pub fn query_i64(&self, conn: &Connection) -> rusqlite::Result<Option<i64>> {
    use rusqlite::OptionalExtension as _;
    conn
      .query_row(&self.sql, params_from_iter(self.params.iter()), |row| row.get(0))
      .optional()
  }
}

fn column_list(schema: &Schema) -> String {
  schema.columns().map(|c| c.name).collect::<Vec<_>>().join(", ")
}

fn where_clause(schema: &Schema, filter: &Filter, params: &mut Vec<SqlValue>) -> Result<String> {
  if filter.is_empty() {
    return Ok(String::new());
  }
  let mut conds = Vec::with_capacity(filter.clauses().len());
  for (field, value) in filter.clauses() {
    let column = schema.require_column(field)?;
    if value.is_null() {
      conds.push(format!("{} IS NULL", column.name));
    } else {
      params.push(encode_value(schema, column, value)?);
      conds.push(format!("{} = ?", column.name));
    }
  }
  Ok(format!(" WHERE {}", conds.join(" AND ")))
}

fn default_order(schema: &Schema) -> &'static str {
  match schema.order {
    DefaultOrder::Insertion => " ORDER BY seq ASC",
    DefaultOrder::RecentlyUpdated => " ORDER BY updated_at DESC, seq DESC",
  }
}

fn order_clause(schema: &Schema, options: &FindOptions) -> Result<String> {
  let Some(sort) = &options.sort else {
    return Ok(default_order(schema).to_owned());
  };
  let column = schema.require_column(&sort.field)?;
  let dir = match sort.direction {
    Direction::Ascending => "ASC",
    Direction::Descending => "DESC",
  };
  // seq breaks ties so paging is stable.
  Ok(format!(" ORDER BY {} {dir}, seq {dir}", column.name))
}

fn paging(options: &FindOptions, params: &mut Vec<SqlValue>) -> String {
  let as_param = |n: usize| SqlValue::Integer(i64::try_from(n).unwrap_or(i64::MAX));
  match (options.limit, options.skip) {
    (None, None) => String::new(),
    (Some(limit), None) => {
      params.push(as_param(limit));
      " LIMIT ?".to_owned()
    }
    (limit, Some(skip)) => {
      params.push(limit.map_or(SqlValue::Integer(-1), as_param));
      params.push(as_param(skip));
      " LIMIT ? OFFSET ?".to_owned()
    }
  }
}

// ─── Reads ───────────────────────────────────────────────────────────────────

pub fn select(schema: &Schema, filter: &Filter, options: &FindOptions) -> Result<Statement> {
  let mut params = Vec::new();
  let filter_sql = where_clause(schema, filter, &mut params)?;
  let order = order_clause(schema, options)?;
  let paging = paging(options, &mut params);
  Ok(Statement {
    sql: format!(
      "SELECT {} FROM {}{filter_sql}{order}{paging}",
      column_list(schema),
      schema.name
    ),
    params,
  })
}

pub fn select_by_seq(schema: &Schema, seq: i64) -> Statement {
  Statement {
    sql:    format!("SELECT {} FROM {} WHERE seq = ?", column_list(schema), schema.name),
    params: vec![SqlValue::Integer(seq)],
  }
}

pub fn count(schema: &Schema, filter: &Filter) -> Result<Statement> {
  let mut params = Vec::new();
  let filter_sql = where_clause(schema, filter, &mut params)?;
  Ok(Statement {
    sql: format!("SELECT COUNT(*) FROM {}{filter_sql}", schema.name),
    params,
  })
}

/// The `seq` of the first row matching `filter` in default order.
pub fn locate_first(schema: &Schema, filter: &Filter) -> Result<Statement> {
  let mut params = Vec::new();
  let filter_sql = where_clause(schema, filter, &mut params)?;
  Ok(Statement {
    sql: format!(
      "SELECT seq FROM {}{filter_sql}{} LIMIT 1",
      schema.name,
      default_order(schema)
    ),
    params,
  })
}

// ─── Writes ──────────────────────────────────────────────────────────────────

pub fn insert(schema: &Schema, fields: &Fields) -> Result<Statement> {
  let encoded = encode_fields(schema, fields)?;
  if encoded.is_empty() {
    return Err(Error::InvalidArgument(format!("nothing to insert into {}", schema.name)));
  }
  let names: Vec<&str> = encoded.iter().map(|(name, _)| *name).collect();
  let marks = vec!["?"; encoded.len()].join(", ");
  Ok(Statement {
    sql:    format!("INSERT INTO {} ({}) VALUES ({marks})", schema.name, names.join(", ")),
    params: encoded.into_iter().map(|(_, v)| v).collect(),
  })
}

fn set_clause(schema: &Schema, patch: &Fields, params: &mut Vec<SqlValue>) -> Result<String> {
  let encoded = encode_fields(schema, patch)?;
  if encoded.is_empty() {
    return Err(Error::InvalidArgument(format!("empty update for {}", schema.name)));
  }
  let sets: Vec<String> = encoded
    .into_iter()
    .map(|(name, value)| {
      params.push(value);
      format!("{name} = ?")
    })
    .collect();
  Ok(sets.join(", "))
}

/// Write `patch` into every row matching `filter`.
pub fn update_many(schema: &Schema, filter: &Filter, patch: &Fields) -> Result<Statement> {
  let mut params = Vec::new();
  let sets = set_clause(schema, patch, &mut params)?;
  let filter_sql = where_clause(schema, filter, &mut params)?;
  Ok(Statement {
    sql: format!("UPDATE {} SET {sets}{filter_sql}", schema.name),
    params,
  })
}

/// Write `patch` into the row with the given `seq`. The row number is bound
/// when the statement runs.
pub fn update_by_seq(schema: &Schema, patch: &Fields) -> Result<Statement> {
  let mut params = Vec::new();
  let sets = set_clause(schema, patch, &mut params)?;
  Ok(Statement {
    sql: format!("UPDATE {} SET {sets} WHERE seq = ?", schema.name),
    params,
  })
}

pub fn delete(schema: &Schema, filter: &Filter, scope: DeleteScope) -> Result<Statement> {
  let mut params = Vec::new();
  let filter_sql = where_clause(schema, filter, &mut params)?;
  let sql = match scope {
    DeleteScope::Many => format!("DELETE FROM {}{filter_sql}", schema.name),
    DeleteScope::One => format!(
      "DELETE FROM {table} WHERE seq = (SELECT seq FROM {table}{filter_sql}{order} LIMIT 1)",
      table = schema.name,
      order = default_order(schema)
    ),
  };
  Ok(Statement { sql, params })
}

#[cfg(test)]
mod tests {
  use quire_core::schema::{CHATS, FOLDERS};
  use serde_json::json;

  use super::*;

  #[test]
  fn null_clauses_use_is_null() {
    let filter = Filter::new().eq("owner_id", "u1").is_null("parent_id");
    let stmt = count(&FOLDERS, &filter).unwrap();
    assert_eq!(
      stmt.sql,
      "SELECT COUNT(*) FROM folders WHERE owner_id = ? AND parent_id IS NULL"
    );
    assert_eq!(stmt.params, vec![SqlValue::Text("u1".into())]);
  }

  #[test]
  fn recently_updated_collections_order_newest_first() {
    let stmt = select(&CHATS, &Filter::new(), &FindOptions::new().limit(5)).unwrap();
    assert!(stmt.sql.ends_with(" ORDER BY updated_at DESC, seq DESC LIMIT ?"));
    assert_eq!(stmt.params, vec![SqlValue::Integer(5)]);
  }

  #[test]
  fn skip_without_limit_is_unbounded() {
    let stmt = select(&FOLDERS, &Filter::new(), &FindOptions::new().skip(2)).unwrap();
    assert!(stmt.sql.ends_with(" ORDER BY seq ASC LIMIT ? OFFSET ?"));
    assert_eq!(stmt.params, vec![SqlValue::Integer(-1), SqlValue::Integer(2)]);
  }

  #[test]
  fn update_binds_set_values_before_filter_values() {
    let patch = match json!({ "path": "A/B" }) {
      serde_json::Value::Object(map) => map,
      _ => unreachable!(),
    };
    let stmt = update_many(&FOLDERS, &Filter::by_id("f1"), &patch).unwrap();
    assert_eq!(stmt.sql, "UPDATE folders SET path = ? WHERE id = ?");
    assert_eq!(
      stmt.params,
      vec![SqlValue::Text("A/B".into()), SqlValue::Text("f1".into())]
    );
  }

  #[test]
  fn delete_one_targets_first_row() {
    let stmt = delete(&FOLDERS, &Filter::new().eq("owner_id", "u1"), DeleteScope::One).unwrap();
    assert_eq!(
      stmt.sql,
      "DELETE FROM folders WHERE seq = (SELECT seq FROM folders WHERE owner_id = ? ORDER BY \
       seq ASC LIMIT 1)"
    );
  }

  #[test]
  fn unknown_filter_fields_are_rejected() {
    let err = count(&FOLDERS, &Filter::new().eq("colour", "red")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
  }
}
