//! Installation-wide key/value settings and per-user preferences.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
  Error, Result,
  backend::Backend,
  collection::Collection,
  query::{Fields, Filter, Patch},
  record::Record,
  schema::{self, Schema},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
  pub id:         String,
  pub key:        String,
  pub value:      String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Record for Setting {
  const SCHEMA: &'static Schema = &schema::SETTINGS;

  fn id(&self) -> &str { &self.id }
}

#[derive(Clone)]
pub struct SettingsStore {
  settings: Collection<Setting>,
}

impl SettingsStore {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self { settings: Collection::new(backend) }
  }

  pub fn collection(&self) -> &Collection<Setting> { &self.settings }

  pub async fn get(&self, key: &str) -> Result<Option<String>> {
    let setting = self.settings.find_one(&Filter::new().eq("key", key)).await?;
    Ok(setting.map(|s| s.value))
  }

  pub async fn all(&self) -> Result<Vec<Setting>> { self.settings.find(&Filter::new()).await }

  /// Insert or overwrite `key`.
  pub async fn set(&self, key: &str, value: &str) -> Result<Setting> {
    let by_key = Filter::new().eq("key", key);
    let patch = || Patch::new().set("value", value);

    if let Some(updated) = self.settings.find_one_and_update(&by_key, patch()).await? {
      return Ok(updated);
    }
    match self.settings.create(&json!({ "key": key, "value": value })).await {
      Ok(created) => Ok(created),
      // Another writer inserted the key between our update and insert.
      Err(Error::ConstraintViolation { field: Some(ref field), .. }) if field == "key" => {
        debug!(key, "setting appeared concurrently, updating instead");
        self
          .settings
          .find_one_and_update(&by_key, patch())
          .await?
          .ok_or_else(|| Error::not_found("setting", key))
      }
      Err(e) => Err(e),
    }
  }

  /// Returns whether the key existed.
  pub async fn remove(&self, key: &str) -> Result<bool> {
    Ok(self.settings.delete_one(&Filter::new().eq("key", key)).await? > 0)
  }
}

// ─── User settings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
  pub id:                 String,
  pub owner_id:           String,
  pub default_persona_id: Option<String>,
  #[serde(default)]
  pub preferences:        Fields,
  pub created_at:         DateTime<Utc>,
  pub updated_at:         DateTime<Utc>,
}

impl Record for UserSettings {
  const SCHEMA: &'static Schema = &schema::USER_SETTINGS;

  fn id(&self) -> &str { &self.id }
}

#[derive(Clone)]
pub struct UserSettingsStore {
  settings:   Collection<UserSettings>,
  prefs_lock: Arc<Mutex<()>>,
}

impl UserSettingsStore {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self {
      settings:   Collection::new(backend),
      prefs_lock: Arc::new(Mutex::new(())),
    }
  }

  pub fn collection(&self) -> &Collection<UserSettings> { &self.settings }

  /// The owner's settings row, created with defaults on first access.
  pub async fn get_or_create(&self, owner_id: &str) -> Result<UserSettings> {
    let by_owner = Filter::new().eq("owner_id", owner_id);
    if let Some(existing) = self.settings.find_one(&by_owner).await? {
      return Ok(existing);
    }

    match self.settings.create(&json!({ "owner_id": owner_id })).await {
      Ok(created) => Ok(created),
      Err(Error::ConstraintViolation { field: Some(ref field), .. }) if field == "owner_id" => self
        .settings
        .find_one(&by_owner)
        .await?
        .ok_or_else(|| Error::not_found("user settings", owner_id)),
      Err(e) => Err(e),
    }
  }

  pub async fn update(&self, owner_id: &str, patch: Patch) -> Result<UserSettings> {
    let _guard = self.prefs_lock.lock().await;
    let current = self.get_or_create(owner_id).await?;
    self.settings.update(&current.id, patch).await
  }

  /// Merge `preferences` into the stored preferences, key by key.
  pub async fn merge_preferences(&self, owner_id: &str, preferences: Fields) -> Result<UserSettings> {
    let _guard = self.prefs_lock.lock().await;
    let mut current = self.get_or_create(owner_id).await?;
    current.preferences.extend(preferences);
    let patch = Patch::new().set("preferences", current.preferences);
    self.settings.update(&current.id, patch).await
  }
}
