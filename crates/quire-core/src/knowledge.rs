//! Knowledge bases: shared document collections with access control.
//!
//! Access is decided by [`has_access`] from the record alone. The slug,
//! storage prefix and abbreviation are derived from the name once at
//! creation when the caller leaves them out.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
  Error, Result,
  backend::Backend,
  collection::Collection,
  query::{Filter, Patch},
  record::Record,
  schema::{self, Schema},
};

/// Longest slug [`derive_slug`] produces.
pub const MAX_SLUG_LEN: usize = 48;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
  /// Everyone.
  Public,
  /// Only users listed in `allowed_users`.
  #[default]
  Restricted,
  /// Users whose role is listed in `allowed_roles`.
  RoleBased,
}

impl AccessMode {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Public => "public",
      Self::Restricted => "restricted",
      Self::RoleBased => "role-based",
    }
  }
}

impl fmt::Display for AccessMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl From<AccessMode> for Value {
  fn from(mode: AccessMode) -> Self { Value::String(mode.as_str().to_owned()) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
  pub id:             String,
  pub name:           String,
  pub slug:           String,
  pub storage_prefix: String,
  pub abbreviation:   String,
  pub description:    Option<String>,
  pub owner_id:       Option<String>,
  pub access_mode:    AccessMode,
  #[serde(default)]
  pub allowed_roles:  Vec<String>,
  #[serde(default)]
  pub allowed_users:  Vec<String>,
  pub created_at:     DateTime<Utc>,
  pub updated_at:     DateTime<Utc>,
}

impl Record for KnowledgeBase {
  const SCHEMA: &'static Schema = &schema::KNOWLEDGE_BASES;

  fn id(&self) -> &str { &self.id }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewKnowledgeBase {
  pub name:           String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub slug:           Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub storage_prefix: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub abbreviation:   Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description:    Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub owner_id:       Option<String>,
  pub access_mode:    AccessMode,
  pub allowed_roles:  Vec<String>,
  pub allowed_users:  Vec<String>,
}

impl NewKnowledgeBase {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), ..Default::default() }
  }

  pub fn access(mut self, mode: AccessMode) -> Self {
    self.access_mode = mode;
    self
  }
}

// ─── Access and derivation ───────────────────────────────────────────────────

pub fn has_access(kb: &KnowledgeBase, user_id: &str, role: &str) -> bool {
  match kb.access_mode {
    AccessMode::Public => true,
    AccessMode::RoleBased => kb.allowed_roles.iter().any(|r| r == role),
    AccessMode::Restricted => kb.allowed_users.iter().any(|u| u == user_id),
  }
}

/// Lowercase ASCII alphanumerics, every other run collapsed to one `-`,
/// trimmed of dashes and cut to [`MAX_SLUG_LEN`]. Applying it to its own
/// output changes nothing.
pub fn derive_slug(name: &str) -> String {
  let mut slug = String::with_capacity(name.len());
  for c in name.chars() {
    if c.is_ascii_alphanumeric() {
      slug.push(c.to_ascii_lowercase());
    } else if !slug.is_empty() && !slug.ends_with('-') {
      slug.push('-');
    }
  }

  slug.truncate(MAX_SLUG_LEN);
  let slug = slug.trim_end_matches('-');
  if slug.is_empty() { "kb".to_owned() } else { slug.to_owned() }
}

/// Directory-safe prefix for a knowledge base's stored files.
pub fn derive_storage_prefix(slug: &str) -> String { format!("kb_{}", slug.replace('-', "_")) }

/// Initials of up to four words, or the first three letters of a single
/// word, uppercased.
pub fn derive_abbreviation(name: &str) -> String {
  let words: Vec<&str> = name
    .split(|c: char| !c.is_alphanumeric())
    .filter(|w| !w.is_empty())
    .collect();

  let abbreviation: String = match words.as_slice() {
    [] => return "KB".to_owned(),
    [word] => word.chars().take(3).collect(),
    many => many.iter().take(4).filter_map(|w| w.chars().next()).collect(),
  };
  abbreviation.to_uppercase()
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct KnowledgeBaseStore {
  bases:       Collection<KnowledgeBase>,
  grants_lock: Arc<Mutex<()>>,
}

impl KnowledgeBaseStore {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self {
      bases:       Collection::new(backend),
      grants_lock: Arc::new(Mutex::new(())),
    }
  }

  pub fn collection(&self) -> &Collection<KnowledgeBase> { &self.bases }

  pub async fn create(&self, input: &NewKnowledgeBase) -> Result<KnowledgeBase> {
    if input.name.trim().is_empty() {
      return Err(Error::InvalidArgument("knowledge base name must not be empty".into()));
    }

    let mut input = input.clone();
    let slug = input.slug.take().unwrap_or_else(|| derive_slug(&input.name));
    input.storage_prefix.get_or_insert_with(|| derive_storage_prefix(&slug));
    input.abbreviation.get_or_insert_with(|| derive_abbreviation(&input.name));
    input.slug = Some(slug);

    let kb = self.bases.create(&input).await?;
    info!(kb_id = %kb.id, slug = %kb.slug, mode = %kb.access_mode, "created knowledge base");
    Ok(kb)
  }

  pub async fn find_by_slug(&self, slug: &str) -> Result<Option<KnowledgeBase>> {
    self.bases.find_one(&Filter::new().eq("slug", slug)).await
  }

  /// Every knowledge base the user may read.
  pub async fn accessible_to(&self, user_id: &str, role: &str) -> Result<Vec<KnowledgeBase>> {
    let all = self.bases.find(&Filter::new()).await?;
    Ok(all.into_iter().filter(|kb| has_access(kb, user_id, role)).collect())
  }

  pub async fn grant_user(&self, id: &str, user_id: &str) -> Result<KnowledgeBase> {
    self
      .edit_users(id, |users| {
        if users.iter().any(|u| u == user_id) {
          return false;
        }
        users.push(user_id.to_owned());
        true
      })
      .await
  }

  pub async fn revoke_user(&self, id: &str, user_id: &str) -> Result<KnowledgeBase> {
    self
      .edit_users(id, |users| {
        let before = users.len();
        users.retain(|u| u != user_id);
        users.len() != before
      })
      .await
  }

  /// Read-modify-write of `allowed_users`; `edit` reports whether it changed
  /// anything.
  async fn edit_users(
    &self,
    id: &str,
    edit: impl FnOnce(&mut Vec<String>) -> bool,
  ) -> Result<KnowledgeBase> {
    let _guard = self.grants_lock.lock().await;
    let mut kb = self.bases.get(id).await?;
    if !edit(&mut kb.allowed_users) {
      return Ok(kb);
    }
    let patch = Patch::new().set("allowed_users", kb.allowed_users);
    self.bases.update(id, patch).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kb(mode: AccessMode) -> KnowledgeBase {
    KnowledgeBase {
      id:             "kb1".into(),
      name:           "Handbook".into(),
      slug:           "handbook".into(),
      storage_prefix: "kb_handbook".into(),
      abbreviation:   "HAN".into(),
      description:    None,
      owner_id:       None,
      access_mode:    mode,
      allowed_roles:  vec!["admin".into()],
      allowed_users:  vec!["u1".into()],
      created_at:     Utc::now(),
      updated_at:     Utc::now(),
    }
  }

  #[test]
  fn access_matrix() {
    let public = kb(AccessMode::Public);
    assert!(has_access(&public, "anyone", "user"));

    let roles = kb(AccessMode::RoleBased);
    assert!(has_access(&roles, "u9", "admin"));
    assert!(!has_access(&roles, "u1", "user"));

    let restricted = kb(AccessMode::Restricted);
    assert!(has_access(&restricted, "u1", "user"));
    assert!(!has_access(&restricted, "u2", "admin"));
  }

  #[test]
  fn slugs_are_url_safe_and_idempotent() {
    assert_eq!(derive_slug("Company Handbook 2024!"), "company-handbook-2024");
    assert_eq!(derive_slug("  --Ünïcode  Notes-- "), "n-code-notes");
    assert_eq!(derive_slug("!!!"), "kb");

    let long = derive_slug(&"word ".repeat(30));
    assert!(long.len() <= MAX_SLUG_LEN);
    assert!(!long.ends_with('-'));

    for name in ["Company Handbook 2024!", "a  b", "x-".repeat(40).as_str()] {
      let once = derive_slug(name);
      assert_eq!(derive_slug(&once), once);
    }
  }

  #[test]
  fn prefix_and_abbreviation() {
    assert_eq!(derive_storage_prefix("company-handbook"), "kb_company_handbook");
    assert_eq!(derive_abbreviation("Company Handbook"), "CH");
    assert_eq!(derive_abbreviation("engineering"), "ENG");
    assert_eq!(derive_abbreviation("one two three four five"), "OTTF");
    assert_eq!(derive_abbreviation(""), "KB");
  }

  #[test]
  fn access_mode_wire_names() {
    assert_eq!(serde_json::to_value(AccessMode::RoleBased).unwrap(), "role-based");
    assert_eq!(Value::from(AccessMode::Restricted), "restricted");
  }
}
