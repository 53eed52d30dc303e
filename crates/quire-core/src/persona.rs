//! Personas and the one-active-persona-per-owner rule.
//!
//! [`PersonaStore`] is the only writer of `is_active`. Every path that turns
//! a persona on clears the owner's other active personas in the same atomic
//! batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::{
  Error, Result,
  backend::Backend,
  collection::Collection,
  query::{Filter, Patch},
  record::Record,
  schema::{self, Schema},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
  pub id:            String,
  pub owner_id:      String,
  pub name:          String,
  pub description:   Option<String>,
  pub system_prompt: String,
  pub is_active:     bool,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

impl Record for Persona {
  const SCHEMA: &'static Schema = &schema::PERSONAS;
  const MANAGED_FIELDS: &'static [&'static str] = &["is_active"];

  fn id(&self) -> &str { &self.id }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewPersona {
  pub owner_id:      String,
  pub name:          String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description:   Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub system_prompt: Option<String>,
  /// Never serialized; activation goes through [`PersonaStore::activate`].
  #[serde(skip)]
  pub is_active:     bool,
}

impl NewPersona {
  pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self { owner_id: owner_id.into(), name: name.into(), ..Default::default() }
  }

  pub fn active(mut self) -> Self {
    self.is_active = true;
    self
  }
}

#[derive(Clone)]
pub struct PersonaStore {
  personas: Collection<Persona>,
}

impl PersonaStore {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self { personas: Collection::new(backend).with_managed_writes() }
  }

  /// A plain handle for reads and ordinary edits; it refuses `is_active`.
  pub fn collection(&self) -> Collection<Persona> { self.personas.without_managed_writes() }

  pub async fn get(&self, id: &str) -> Result<Persona> { self.personas.get(id).await }

  pub async fn create(&self, input: &NewPersona) -> Result<Persona> {
    let persona = self.personas.create(input).await?;
    if input.is_active {
      return self.activate(&persona.id).await;
    }
    Ok(persona)
  }

  pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Persona>> {
    self.personas.find(&Filter::new().eq("owner_id", owner_id)).await
  }

  pub async fn active_for(&self, owner_id: &str) -> Result<Option<Persona>> {
    let filter = Filter::new().eq("owner_id", owner_id).eq("is_active", true);
    self.personas.find_one(&filter).await
  }

  /// Make `id` the owner's only active persona.
  pub async fn activate(&self, id: &str) -> Result<Persona> {
    let persona = self.personas.get(id).await?;

    let ops = vec![
      self.personas.update_op(
        Filter::new().eq("owner_id", persona.owner_id.as_str()).eq("is_active", true),
        Patch::new().set("is_active", false),
      )?,
      self
        .personas
        .update_op(Filter::by_id(id), Patch::new().set("is_active", true))?,
    ];
    self.personas.apply(ops).await?;

    info!(owner_id = %persona.owner_id, persona_id = id, "activated persona");
    self.personas.get(id).await
  }

  pub async fn deactivate(&self, id: &str) -> Result<Persona> {
    self.personas.update(id, Patch::new().set("is_active", false)).await
  }

  /// Apply `patch`. Setting `is_active: true` goes through
  /// [`PersonaStore::activate`] so exclusivity holds.
  pub async fn update(&self, id: &str, mut patch: Patch) -> Result<Persona> {
    let activate = match patch.remove("is_active") {
      None => None,
      Some(Value::Bool(b)) => Some(b),
      Some(other) => {
        return Err(Error::InvalidArgument(format!(
          "is_active must be a boolean, got {other}"
        )));
      }
    };

    let persona = self.personas.update(id, patch).await?;
    match activate {
      Some(true) => self.activate(id).await,
      Some(false) if persona.is_active => self.deactivate(id).await,
      _ => Ok(persona),
    }
  }
}
