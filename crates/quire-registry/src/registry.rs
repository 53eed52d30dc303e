//! [`Registry`]: one handle per collection over a backend chosen at
//! startup.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use quire_core::{
  Backend, Collection, Error, Filter, Result,
  chat::ChatStore,
  document::{Document, DocumentStore, SystemDocument},
  folder::FolderStore,
  knowledge::KnowledgeBaseStore,
  persona::PersonaStore,
  record::{Feedback, User},
  schema,
  settings::{SettingsStore, UserSettingsStore},
};
use quire_store_sqlite::SqliteStore;

use crate::config::{ResolvedBackend, StoreConfig};

/// Builds the alternate remote backend. Supplied by the host process, which
/// owns the remote client library.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
  async fn connect(&self, url: &str) -> Result<Arc<dyn Backend>>;
}

/// Every collection handle, all sharing one backend.
///
/// Cloning is cheap.
#[derive(Clone)]
pub struct Registry {
  backend:          Arc<dyn Backend>,
  users:            Collection<User>,
  documents:        DocumentStore<Document>,
  system_documents: DocumentStore<SystemDocument>,
  chats:            ChatStore,
  personas:         PersonaStore,
  settings:         SettingsStore,
  folders:          FolderStore,
  knowledge_bases:  KnowledgeBaseStore,
  user_settings:    UserSettingsStore,
  feedback:         Collection<Feedback>,
}

impl Registry {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self {
      users:            Collection::new(Arc::clone(&backend)),
      documents:        DocumentStore::new(Arc::clone(&backend)),
      system_documents: DocumentStore::new(Arc::clone(&backend)),
      chats:            ChatStore::new(Arc::clone(&backend)),
      personas:         PersonaStore::new(Arc::clone(&backend)),
      settings:         SettingsStore::new(Arc::clone(&backend)),
      folders:          FolderStore::new(Arc::clone(&backend)),
      knowledge_bases:  KnowledgeBaseStore::new(Arc::clone(&backend)),
      user_settings:    UserSettingsStore::new(Arc::clone(&backend)),
      feedback:         Collection::new(Arc::clone(&backend)),
      backend,
    }
  }

  /// Resolve the backend named by `config` and open it. Fails before any
  /// collection exists when no backend is configured, or when the remote
  /// backend is selected without a `remote` connector.
  pub async fn open(config: &StoreConfig, remote: Option<&dyn RemoteConnector>) -> Result<Self> {
    let backend: Arc<dyn Backend> = match config.resolve()? {
      ResolvedBackend::Sqlite(path) => {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
          tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Backend(Box::new(e)))?;
        }
        Arc::new(SqliteStore::open_with(&path, config.retry.into()).await?)
      }
      ResolvedBackend::Remote(url) => {
        let connector = remote.ok_or_else(|| {
          Error::Config(format!("remote backend {url} selected but no connector was supplied"))
        })?;
        connector.connect(&url).await?
      }
    };

    info!(backend = backend.name(), "collection registry ready");
    Ok(Self::new(backend))
  }

  pub fn backend(&self) -> &Arc<dyn Backend> { &self.backend }

  pub fn users(&self) -> &Collection<User> { &self.users }

  pub fn documents(&self) -> &DocumentStore<Document> { &self.documents }

  pub fn system_documents(&self) -> &DocumentStore<SystemDocument> { &self.system_documents }

  pub fn chats(&self) -> &ChatStore { &self.chats }

  pub fn personas(&self) -> &PersonaStore { &self.personas }

  pub fn settings(&self) -> &SettingsStore { &self.settings }

  pub fn folders(&self) -> &FolderStore { &self.folders }

  pub fn knowledge_bases(&self) -> &KnowledgeBaseStore { &self.knowledge_bases }

  pub fn user_settings(&self) -> &UserSettingsStore { &self.user_settings }

  pub fn feedback(&self) -> &Collection<Feedback> { &self.feedback }

  /// Record count per collection, in table order.
  pub async fn counts(&self) -> Result<Vec<(&'static str, u64)>> {
    let mut counts = Vec::with_capacity(schema::ALL.len());
    for schema in schema::ALL {
      counts.push((schema.name, self.backend.count(schema, &Filter::new()).await?));
    }
    Ok(counts)
  }
}
