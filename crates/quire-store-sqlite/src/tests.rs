//! Integration tests for `SqliteStore` through the typed query engine.

use std::{sync::Arc, time::Duration};

use quire_core::{
  Backend, Collection, Error, Filter, FindOptions, Patch, Record,
  chat::{Chat, NewChat},
  document::{Document, NewDocument, ProcessingStatus},
  knowledge::KnowledgeBase,
  query::Direction,
  record::{NewUser, User},
  schema,
};
use serde_json::json;

use crate::{RetryPolicy, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn collection<R: Record>(store: &SqliteStore) -> Collection<R> {
  let backend: Arc<dyn Backend> = Arc::new(store.clone());
  Collection::new(backend)
}

async fn user(users: &Collection<User>, name: &str) -> User {
  users
    .create(&NewUser::new(name, format!("{}@example.com", name.to_lowercase())))
    .await
    .unwrap()
}

// ─── Create / read ───────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_find_by_id_round_trips() {
  let s = store().await;
  let users = collection::<User>(&s);

  let created = user(&users, "Ada").await;
  assert!(quire_core::id::is_valid(&created.id));
  assert_eq!(created.role, "user");
  assert_eq!(created.avatar_url, None);
  assert_eq!(created.created_at, created.updated_at);

  let fetched = users.find_by_id(&created.id).await.unwrap();
  assert_eq!(fetched, Some(created));
}

#[tokio::test]
async fn find_by_id_missing_returns_none() {
  let s = store().await;
  let users = collection::<User>(&s);
  assert!(users.find_by_id("0123456789abcdef01234567").await.unwrap().is_none());
  assert!(users.get("0123456789abcdef01234567").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn document_status_scenario() {
  let s = store().await;
  let users = collection::<User>(&s);
  let documents = collection::<Document>(&s);

  let u = user(&users, "Grace").await;
  let d = documents
    .create(&NewDocument::new("Notes", "abc123").owned_by(u.id.as_str()))
    .await
    .unwrap();
  assert_eq!(d.status, ProcessingStatus::Pending);

  let found = documents
    .find_one(&Filter::new().eq("owner_id", u.id.as_str()).eq("fingerprint", "abc123"))
    .await
    .unwrap();
  assert_eq!(found.as_ref().map(|f| f.id.as_str()), Some(d.id.as_str()));

  documents
    .find_by_id_and_update(&d.id, Patch::new().set("status", ProcessingStatus::Completed))
    .await
    .unwrap()
    .unwrap();

  let completed = documents
    .find(&Filter::new().eq("owner_id", u.id.as_str()).eq("status", "completed"))
    .await
    .unwrap();
  assert_eq!(completed.len(), 1);
  assert_eq!(completed[0].id, d.id);
}

#[tokio::test]
async fn explicit_null_matches_null() {
  let s = store().await;
  let documents = collection::<Document>(&s);

  documents.create(&NewDocument::new("loose", "f1")).await.unwrap();
  documents
    .create(&NewDocument::new("owned", "f2").owned_by("u1"))
    .await
    .unwrap();

  let loose = documents.find(&Filter::new().is_null("owner_id")).await.unwrap();
  assert_eq!(loose.len(), 1);
  assert_eq!(loose[0].title, "loose");
  assert_eq!(documents.count(&Filter::new()).await.unwrap(), 2);
}

#[tokio::test]
async fn unknown_filter_field_is_rejected() {
  let s = store().await;
  let users = collection::<User>(&s);
  let err = users.find(&Filter::new().eq("password", "x")).await.unwrap_err();
  assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn type_mismatch_is_rejected() {
  let s = store().await;
  let chats = collection::<Chat>(&s);
  let err = chats
    .create(&json!({ "owner_id": "u1", "messages": "not a list" }))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidArgument(_)));
}

// ─── Ordering and paging ─────────────────────────────────────────────────────

#[tokio::test]
async fn chats_default_to_most_recently_updated_first() {
  let s = store().await;
  let chats = collection::<Chat>(&s);

  let first = chats.create(&NewChat::new("u1")).await.unwrap();
  let second = chats.create(&NewChat::new("u1")).await.unwrap();
  chats
    .find_by_id_and_update(&first.id, Patch::new().set("title", "bumped"))
    .await
    .unwrap();

  let listed: Vec<String> = chats
    .find(&Filter::new().eq("owner_id", "u1"))
    .await
    .unwrap()
    .into_iter()
    .map(|c| c.id)
    .collect();
  assert_eq!(listed, [first.id, second.id]);
}

#[tokio::test]
async fn users_default_to_insertion_order_with_paging() {
  let s = store().await;
  let users = collection::<User>(&s);
  for name in ["A", "B", "C", "D"] {
    user(&users, name).await;
  }

  let names = |found: Vec<User>| found.into_iter().map(|u| u.name).collect::<Vec<_>>();

  let all = users.find(&Filter::new()).await.unwrap();
  assert_eq!(names(all), ["A", "B", "C", "D"]);

  let page = users
    .find_with(&Filter::new(), &FindOptions::new().skip(1).limit(2))
    .await
    .unwrap();
  assert_eq!(names(page), ["B", "C"]);

  let reversed = users
    .find_with(&Filter::new(), &FindOptions::new().sort_by("name", Direction::Descending))
    .await
    .unwrap();
  assert_eq!(names(reversed), ["D", "C", "B", "A"]);
}

// ─── Update / delete ─────────────────────────────────────────────────────────

#[tokio::test]
async fn update_refreshes_updated_at_and_keeps_identity() {
  let s = store().await;
  let users = collection::<User>(&s);
  let ada = user(&users, "Ada").await;

  let patch = Patch::new()
    .set("name", "Ada L.")
    .set("id", "ffffffffffffffffffffffff")
    .set("created_at", "2000-01-01T00:00:00Z")
    .set("isAdmin", true);
  let updated = users
    .find_one_and_update(&Filter::new().eq("email", "ada@example.com"), patch)
    .await
    .unwrap()
    .unwrap();

  assert_eq!(updated.id, ada.id);
  assert_eq!(updated.name, "Ada L.");
  assert_eq!(updated.created_at, ada.created_at);
  assert!(updated.updated_at > ada.updated_at);
}

#[tokio::test]
async fn update_without_match_returns_none() {
  let s = store().await;
  let users = collection::<User>(&s);
  let result = users
    .find_one_and_update(&Filter::new().eq("name", "nobody"), Patch::new())
    .await
    .unwrap();
  assert!(result.is_none());
}

#[tokio::test]
async fn delete_one_removes_only_the_first_match() {
  let s = store().await;
  let users = collection::<User>(&s);
  for name in ["A", "B", "C"] {
    users
      .create(&json!({ "name": name, "email": format!("{name}@x"), "role": "guest" }))
      .await
      .unwrap();
  }

  let removed = users.delete_one(&Filter::new().eq("role", "guest")).await.unwrap();
  assert_eq!(removed, 1);
  let left: Vec<String> = users
    .find(&Filter::new())
    .await
    .unwrap()
    .into_iter()
    .map(|u| u.name)
    .collect();
  assert_eq!(left, ["B", "C"]);

  assert_eq!(users.delete_many(&Filter::new().eq("role", "guest")).await.unwrap(), 2);
  assert_eq!(users.count(&Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn find_by_id_and_delete_returns_removed_record() {
  let s = store().await;
  let users = collection::<User>(&s);
  let ada = user(&users, "Ada").await;

  let removed = users.find_by_id_and_delete(&ada.id).await.unwrap();
  assert_eq!(removed, Some(ada.clone()));
  assert!(users.find_by_id(&ada.id).await.unwrap().is_none());
  assert!(users.find_by_id_and_delete(&ada.id).await.unwrap().is_none());
}

// ─── Constraints ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_natural_key_is_constraint_violation() {
  let s = store().await;
  let users = collection::<User>(&s);
  user(&users, "Ada").await;

  let err = users
    .create(&NewUser::new("Other Ada", "ada@example.com"))
    .await
    .unwrap_err();
  match err {
    Error::ConstraintViolation { collection, field, .. } => {
      assert_eq!(collection, "users");
      assert_eq!(field.as_deref(), Some("email"));
    }
    other => panic!("unexpected error: {other}"),
  }
}

#[tokio::test]
async fn supplied_duplicate_id_is_not_regenerated() {
  let s = store().await;
  let users = collection::<User>(&s);
  let ada = user(&users, "Ada").await;

  let err = users
    .create(&json!({ "id": ada.id, "name": "Copy", "email": "copy@x" }))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ConstraintViolation { .. }));
}

#[tokio::test]
async fn colliding_identifiers_are_exhausted() {
  let s = store().await;
  let users =
    collection::<User>(&s).with_id_source(|| "aaaaaaaaaaaaaaaaaaaaaaaa".to_owned());

  user(&users, "First").await;
  let err = users.create(&NewUser::new("Second", "second@x")).await.unwrap_err();
  assert!(matches!(
    err,
    Error::IdentifierExhausted { collection: "users", attempts: 5 }
  ));
  assert_eq!(users.count(&Filter::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn batches_are_all_or_nothing() {
  let s = store().await;
  let users = collection::<User>(&s);
  let ada = user(&users, "Ada").await;
  let bob = user(&users, "Bob").await;

  let ops = vec![
    users
      .update_op(Filter::by_id(ada.id.as_str()), Patch::new().set("name", "Renamed"))
      .unwrap(),
    // Collides with Ada's email.
    users
      .update_op(Filter::by_id(bob.id.as_str()), Patch::new().set("email", "ada@example.com"))
      .unwrap(),
  ];
  let err = users.apply(ops).await.unwrap_err();
  assert!(matches!(err, Error::ConstraintViolation { .. }));

  assert_eq!(users.get(&ada.id).await.unwrap().name, "Ada");
}

// ─── Codec ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupted_compound_fields_decode_as_empty() {
  let s = store().await;
  let chats = collection::<Chat>(&s);
  let chat = chats.create(&NewChat::new("u1")).await.unwrap();

  let kbs = collection::<KnowledgeBase>(&s);
  let kb = kbs
    .create(&json!({
      "name": "Docs",
      "slug": "docs",
      "storage_prefix": "kb_docs",
      "abbreviation": "DOC",
      "allowed_users": ["u1"],
    }))
    .await
    .unwrap();

  let (chat_id, kb_id) = (chat.id.clone(), kb.id.clone());
  s.connection()
    .call(move |conn| {
      conn.execute("UPDATE chats SET messages = '[{broken' WHERE id = ?1", [&chat_id])?;
      conn.execute(
        "UPDATE knowledge_bases SET allowed_users = '{\"not\":\"a list\"}' WHERE id = ?1",
        [&kb_id],
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let chat = chats.get(&chat.id).await.unwrap();
  assert!(chat.messages.is_empty());
  let kb = kbs.get(&kb.id).await.unwrap();
  assert!(kb.allowed_users.is_empty());
}

#[tokio::test]
async fn ill_typed_updates_are_rejected_before_writing() {
  let s = store().await;
  let docs = collection::<Document>(&s);
  let doc = docs
    .create(&NewDocument::new("Report", "abc123").owned_by("u1"))
    .await
    .unwrap();

  let err = docs
    .find_by_id_and_update(&doc.id, Patch::new().set("size_bytes", 1.5))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidArgument(_)));

  let kbs = collection::<KnowledgeBase>(&s);
  let kb = kbs
    .create(&json!({
      "name": "Docs",
      "slug": "docs",
      "storage_prefix": "kb_docs",
      "abbreviation": "DOC",
      "access_mode": "public",
    }))
    .await
    .unwrap();
  let err = kbs
    .find_by_id_and_update(&kb.id, Patch::new().set("allowed_users", json!([1])))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidArgument(_)));

  let listed = docs.find(&Filter::new().eq("owner_id", "u1")).await.unwrap();
  assert_eq!(listed, [doc]);
  assert_eq!(kbs.find(&Filter::new()).await.unwrap(), [kb]);
}

#[tokio::test]
async fn ill_typed_stored_values_do_not_break_listings() {
  let s = store().await;
  let docs = collection::<Document>(&s);
  let doc = docs
    .create(&NewDocument::new("Report", "abc123").owned_by("u1"))
    .await
    .unwrap();
  let kbs = collection::<KnowledgeBase>(&s);
  let kb = kbs
    .create(&json!({
      "name": "Docs",
      "slug": "docs",
      "storage_prefix": "kb_docs",
      "abbreviation": "DOC",
    }))
    .await
    .unwrap();

  let (doc_id, kb_id) = (doc.id.clone(), kb.id.clone());
  s.connection()
    .call(move |conn| {
      conn.execute("UPDATE documents SET size_bytes = 1.5 WHERE id = ?1", [&doc_id])?;
      conn.execute(
        "UPDATE knowledge_bases SET allowed_users = '[1,\"u1\"]' WHERE id = ?1",
        [&kb_id],
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let listed = docs.find(&Filter::new().eq("owner_id", "u1")).await.unwrap();
  assert_eq!(listed[0].size_bytes, 1);
  let listed = kbs.find(&Filter::new()).await.unwrap();
  assert_eq!(listed[0].allowed_users, ["u1"]);
}

#[tokio::test]
async fn tables_match_collection_schemas() {
  let s = store().await;
  for schema in schema::ALL {
    let table = schema.name;
    let columns: Vec<String> = s
      .connection()
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt
          .query_map([], |row| row.get::<_, String>(1))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
      })
      .await
      .unwrap();

    let expected: Vec<&str> = std::iter::once("seq")
      .chain(schema.columns().map(|c| c.name))
      .collect();
    assert_eq!(columns, expected, "table {table}");
  }
}

// ─── On disk ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn records_persist_across_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("quire.db");

  let id = {
    let s = SqliteStore::open(&path).await.unwrap();
    user(&collection::<User>(&s), "Ada").await.id
  };

  let s = SqliteStore::open(&path).await.unwrap();
  let users = collection::<User>(&s);
  assert_eq!(users.get(&id).await.unwrap().name, "Ada");
}

/// Hold the write lock from a second connection for `hold`, returning once
/// the lock is taken.
async fn hold_write_lock(path: std::path::PathBuf, hold: Duration) -> tokio::task::JoinHandle<()> {
  let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
  let holder = tokio::task::spawn_blocking(move || {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch("BEGIN IMMEDIATE").unwrap();
    locked_tx.send(()).unwrap();
    std::thread::sleep(hold);
    conn.execute_batch("COMMIT").unwrap();
  });
  locked_rx.await.unwrap();
  holder
}

#[tokio::test]
async fn busy_writes_are_retried_until_the_lock_clears() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("quire.db");
  let s = SqliteStore::open(&path).await.unwrap();
  let users = collection::<User>(&s);

  let holder = hold_write_lock(path, Duration::from_millis(60)).await;
  let ada = user(&users, "Ada").await;
  holder.await.unwrap();

  assert_eq!(users.get(&ada.id).await.unwrap().name, "Ada");
}

#[tokio::test]
async fn busy_beyond_the_retry_budget_is_reported() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("quire.db");
  let policy = RetryPolicy {
    max_attempts: 3,
    base_delay:   Duration::from_millis(5),
    max_delay:    Duration::from_millis(10),
  };
  let s = SqliteStore::open_with(&path, policy).await.unwrap();
  let users = collection::<User>(&s);

  let holder = hold_write_lock(path, Duration::from_millis(500)).await;
  let err = users.create(&NewUser::new("Ada", "ada@x")).await.unwrap_err();
  holder.await.unwrap();

  assert!(matches!(err, Error::BackendBusy { attempts: 3 }));
  assert_eq!(users.count(&Filter::new()).await.unwrap(), 0);
}
