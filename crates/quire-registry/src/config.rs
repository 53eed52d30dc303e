//! Store configuration, read from `quire.toml` and `QUIRE_*` environment
//! variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use quire_core::{Error, Result};
use quire_store_sqlite::RetryPolicy;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "quire.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  Sqlite,
  Remote,
}

/// Busy-retry settings; see [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
  pub max_attempts:  u32,
  pub base_delay_ms: u64,
  pub max_delay_ms:  u64,
}

impl Default for RetrySettings {
  fn default() -> Self {
    let policy = RetryPolicy::default();
    Self {
      max_attempts:  policy.max_attempts,
      base_delay_ms: policy.base_delay.as_millis() as u64,
      max_delay_ms:  policy.max_delay.as_millis() as u64,
    }
  }
}

impl From<RetrySettings> for RetryPolicy {
  fn from(s: RetrySettings) -> Self {
    Self {
      max_attempts: s.max_attempts.max(1),
      base_delay:   Duration::from_millis(s.base_delay_ms),
      max_delay:    Duration::from_millis(s.max_delay_ms),
    }
  }
}

/// Which backend to use and where it lives.
///
/// `backend` may be left out when exactly one of `sqlite_path` and
/// `remote_url` is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub backend:     Option<BackendKind>,
  pub sqlite_path: Option<PathBuf>,
  pub remote_url:  Option<String>,
  pub retry:       RetrySettings,
}

/// The backend a [`StoreConfig`] selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedBackend {
  Sqlite(PathBuf),
  Remote(String),
}

impl StoreConfig {
  /// Layer the TOML file at `path` (default [`DEFAULT_CONFIG_FILE`], optional)
  /// under `QUIRE_*` environment variables. Nested keys use `__`, as in
  /// `QUIRE_RETRY__MAX_ATTEMPTS`.
  pub fn load(path: Option<&Path>) -> Result<Self> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    ::config::Config::builder()
      .add_source(::config::File::from(path).required(false))
      .add_source(
        ::config::Environment::with_prefix("QUIRE")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .and_then(|settings| settings.try_deserialize())
      .map_err(|e| Error::Config(format!("failed to load {}: {e}", path.display())))
  }

  pub fn resolve(&self) -> Result<ResolvedBackend> {
    let sqlite = || self.sqlite_path.as_deref().map(|p| ResolvedBackend::Sqlite(expand_tilde(p)));
    let remote = || self.remote_url.clone().map(ResolvedBackend::Remote);

    match self.backend {
      Some(BackendKind::Sqlite) => sqlite()
        .ok_or_else(|| Error::Config("backend is sqlite but sqlite_path is not set".into())),
      Some(BackendKind::Remote) => remote()
        .ok_or_else(|| Error::Config("backend is remote but remote_url is not set".into())),
      None => match (sqlite(), remote()) {
        (Some(backend), None) | (None, Some(backend)) => Ok(backend),
        (Some(_), Some(_)) => Err(Error::Config(
          "both sqlite_path and remote_url are set; choose one with `backend`".into(),
        )),
        (None, None) => Err(Error::Config(
          "no backend configured: set sqlite_path or remote_url".into(),
        )),
      },
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(backend: Option<BackendKind>, sqlite: Option<&str>, remote: Option<&str>) -> StoreConfig {
    StoreConfig {
      backend,
      sqlite_path: sqlite.map(PathBuf::from),
      remote_url: remote.map(str::to_owned),
      ..StoreConfig::default()
    }
  }

  #[test]
  fn backend_is_inferred_from_the_single_setting() {
    assert_eq!(
      config(None, Some("/tmp/q.db"), None).resolve().unwrap(),
      ResolvedBackend::Sqlite("/tmp/q.db".into())
    );
    assert_eq!(
      config(None, None, Some("postgres://db")).resolve().unwrap(),
      ResolvedBackend::Remote("postgres://db".into())
    );
  }

  #[test]
  fn missing_or_ambiguous_backends_fail() {
    for bad in [
      config(None, None, None),
      config(None, Some("q.db"), Some("postgres://db")),
      config(Some(BackendKind::Sqlite), None, Some("postgres://db")),
      config(Some(BackendKind::Remote), Some("q.db"), None),
    ] {
      assert!(matches!(bad.resolve(), Err(Error::Config(_))), "{bad:?}");
    }
  }

  #[test]
  fn explicit_backend_wins() {
    let both = config(Some(BackendKind::Sqlite), Some("q.db"), Some("postgres://db"));
    assert_eq!(both.resolve().unwrap(), ResolvedBackend::Sqlite("q.db".into()));
  }

  #[test]
  fn retry_settings_default_to_policy() {
    let policy: RetryPolicy = RetrySettings::default().into();
    assert_eq!(policy, RetryPolicy::default());
  }
}
