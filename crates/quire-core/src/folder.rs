//! Folder hierarchy with a materialized path column.
//!
//! Folders form a forest per owner through `parent_id`. Each folder stores
//! its full path (ancestor names joined with [`PATH_SEPARATOR`]); renames and
//! moves rewrite the path of every descendant in one atomic batch. Parent
//! chains are walked in application code with a hop bound, so a corrupted
//! chain surfaces as [`Error::StructuralIntegrity`] instead of looping.

use std::{
  collections::{HashMap, HashSet, VecDeque},
  sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  backend::{Backend, WriteOp},
  collection::Collection,
  document::Document,
  query::{Filter, Patch},
  record::Record,
  schema::{self, Schema},
};

pub const PATH_SEPARATOR: char = '/';

/// Parent hops a path walk may take before giving up.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
  pub id:         String,
  pub owner_id:   String,
  pub name:       String,
  pub parent_id:  Option<String>,
  pub path:       String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Record for Folder {
  const SCHEMA: &'static Schema = &schema::FOLDERS;
  const MANAGED_FIELDS: &'static [&'static str] = &["name", "parent_id", "path"];

  fn id(&self) -> &str { &self.id }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewFolder {
  pub owner_id:  String,
  pub name:      String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
}

impl NewFolder {
  pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self { owner_id: owner_id.into(), name: name.into(), parent_id: None }
  }

  pub fn under(mut self, parent_id: impl Into<String>) -> Self {
    self.parent_id = Some(parent_id.into());
    self
  }
}

/// What a folder delete removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
  pub folders:   u64,
  pub documents: u64,
}

/// A folder whose stored path does not match its parent chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathIssue {
  /// The chain resolves, but to a different path.
  Stale {
    folder_id: String,
    stored:    String,
    expected:  String,
  },
  /// The chain cannot be resolved (cycle, dangling parent, too deep).
  Broken { folder_id: String, reason: String },
}

impl PathIssue {
  pub fn folder_id(&self) -> &str {
    match self {
      Self::Stale { folder_id, .. } | Self::Broken { folder_id, .. } => folder_id,
    }
  }
}

pub fn validate_name(name: &str) -> Result<()> {
  if name.trim().is_empty() {
    return Err(Error::InvalidArgument("folder name must not be empty".into()));
  }
  if name.contains(PATH_SEPARATOR) {
    return Err(Error::InvalidArgument(format!(
      "folder name {name:?} must not contain {PATH_SEPARATOR:?}"
    )));
  }
  Ok(())
}

// ─── Tree walking ────────────────────────────────────────────────────────────

/// Folders keyed by identifier.
pub type Tree = HashMap<String, Folder>;

fn tree_of(folders: Vec<Folder>) -> Tree {
  folders.into_iter().map(|f| (f.id.clone(), f)).collect()
}

/// The chain from `id` up to its root, starting with `id` itself.
pub fn chain<'a>(tree: &'a Tree, id: &str) -> Result<Vec<&'a Folder>> {
  let mut current = tree.get(id).ok_or_else(|| Error::not_found("folder", id))?;
  let mut chain = vec![current];
  let mut visited = HashSet::from([current.id.as_str()]);

  while let Some(parent_id) = current.parent_id.as_deref() {
    if chain.len() > MAX_DEPTH {
      return Err(Error::StructuralIntegrity(format!(
        "folder {id} is more than {MAX_DEPTH} levels deep"
      )));
    }
    if !visited.insert(parent_id) {
      return Err(Error::StructuralIntegrity(format!(
        "folder {id} has a cycle in its parent chain at {parent_id}"
      )));
    }
    current = tree.get(parent_id).ok_or_else(|| {
      Error::StructuralIntegrity(format!(
        "folder {} points at missing parent {parent_id}",
        current.id
      ))
    })?;
    chain.push(current);
  }

  Ok(chain)
}

/// The path of `id` as its parent chain defines it.
pub fn resolve_path(tree: &Tree, id: &str) -> Result<String> {
  let chain = chain(tree, id)?;
  let names: Vec<&str> = chain.iter().rev().map(|f| f.name.as_str()).collect();
  Ok(names.join(PATH_SEPARATOR.to_string().as_str()))
}

/// Every folder below `id`, breadth first.
pub fn descendants_in<'a>(tree: &'a Tree, id: &str) -> Vec<&'a Folder> {
  let mut children: HashMap<&str, Vec<&Folder>> = HashMap::new();
  for folder in tree.values() {
    if let Some(parent) = folder.parent_id.as_deref() {
      children.entry(parent).or_default().push(folder);
    }
  }

  let mut found = Vec::new();
  let mut seen = HashSet::from([id]);
  let mut queue = VecDeque::from([id]);
  while let Some(next) = queue.pop_front() {
    for child in children.get(next).into_iter().flatten() {
      if seen.insert(child.id.as_str()) {
        found.push(*child);
        queue.push_back(child.id.as_str());
      }
    }
  }
  found
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FolderStore {
  folders:        Collection<Folder>,
  documents:      Collection<Document>,
  structure_lock: Arc<Mutex<()>>,
}

impl FolderStore {
  pub fn new(backend: Arc<dyn Backend>) -> Self {
    Self {
      folders:        Collection::new(Arc::clone(&backend)).with_managed_writes(),
      documents:      Collection::new(backend),
      structure_lock: Arc::new(Mutex::new(())),
    }
  }

  /// A plain handle for reads; it refuses `name`, `parent_id` and `path`.
  pub fn collection(&self) -> Collection<Folder> { self.folders.without_managed_writes() }

  pub async fn get(&self, id: &str) -> Result<Folder> { self.folders.get(id).await }

  async fn tree_for_owner(&self, owner_id: &str) -> Result<Tree> {
    Ok(tree_of(self.list_for_owner(owner_id).await?))
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Folder>> {
    self.folders.find(&Filter::new().eq("owner_id", owner_id)).await
  }

  pub async fn roots(&self, owner_id: &str) -> Result<Vec<Folder>> {
    let filter = Filter::new().eq("owner_id", owner_id).is_null("parent_id");
    self.folders.find(&filter).await
  }

  pub async fn children(&self, id: &str) -> Result<Vec<Folder>> {
    self.folders.find(&Filter::new().eq("parent_id", id)).await
  }

  /// Walk the parent chain of `id` and join the names from the root down.
  pub async fn build_path(&self, id: &str) -> Result<String> {
    let folder = self.folders.get(id).await?;
    let tree = self.tree_for_owner(&folder.owner_id).await?;
    resolve_path(&tree, id)
  }

  /// Ancestors of `id`, root first, excluding `id`.
  pub async fn ancestors(&self, id: &str) -> Result<Vec<Folder>> {
    let folder = self.folders.get(id).await?;
    let tree = self.tree_for_owner(&folder.owner_id).await?;
    let chain = chain(&tree, id)?;
    Ok(chain.into_iter().skip(1).rev().cloned().collect())
  }

  pub async fn descendants(&self, id: &str) -> Result<Vec<Folder>> {
    let folder = self.folders.get(id).await?;
    let tree = self.tree_for_owner(&folder.owner_id).await?;
    Ok(descendants_in(&tree, id).into_iter().cloned().collect())
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  pub async fn create(&self, input: &NewFolder) -> Result<Folder> {
    validate_name(&input.name)?;
    let _guard = self.structure_lock.lock().await;

    let path = match input.parent_id.as_deref() {
      None => input.name.clone(),
      Some(parent_id) => {
        let parent = self.folders.get(parent_id).await?;
        if parent.owner_id != input.owner_id {
          return Err(Error::InvalidArgument(format!(
            "parent folder {parent_id} belongs to another owner"
          )));
        }
        let tree = self.tree_for_owner(&parent.owner_id).await?;
        if chain(&tree, parent_id)?.len() > MAX_DEPTH {
          return Err(Error::StructuralIntegrity(format!(
            "folder {parent_id} is already {MAX_DEPTH} levels deep"
          )));
        }
        format!("{}{PATH_SEPARATOR}{}", resolve_path(&tree, parent_id)?, input.name)
      }
    };

    #[derive(Serialize)]
    struct Row<'a> {
      #[serde(flatten)]
      input: &'a NewFolder,
      path:  String,
    }
    let folder = self.folders.create(&Row { input, path }).await?;
    debug!(folder_id = %folder.id, path = %folder.path, "created folder");
    Ok(folder)
  }

  /// Rename `id` and rewrite the paths of its subtree.
  pub async fn rename(&self, id: &str, name: &str) -> Result<Folder> {
    validate_name(name)?;
    let _guard = self.structure_lock.lock().await;

    let folder = self.folders.get(id).await?;
    let mut tree = self.tree_for_owner(&folder.owner_id).await?;
    if let Some(entry) = tree.get_mut(id) {
      entry.name = name.to_owned();
    }

    let mut ops = self.path_ops(&tree, id)?;
    ops.insert(
      0,
      self
        .folders
        .update_op(Filter::by_id(id), Patch::new().set("name", name))?,
    );
    self.folders.apply(ops).await?;

    info!(folder_id = id, name, "renamed folder");
    self.folders.get(id).await
  }

  /// Re-parent `id` under `parent_id` (or make it a root) and rewrite the
  /// paths of its subtree. Moving a folder beneath itself or one of its
  /// descendants is rejected before anything is written.
  pub async fn move_to(&self, id: &str, parent_id: Option<&str>) -> Result<Folder> {
    let _guard = self.structure_lock.lock().await;

    let folder = self.folders.get(id).await?;
    let mut tree = self.tree_for_owner(&folder.owner_id).await?;

    if let Some(target) = parent_id {
      if target == id {
        return Err(Error::StructuralIntegrity(format!(
          "folder {id} cannot be moved into itself"
        )));
      }
      if !tree.contains_key(target) {
        let parent = self.folders.get(target).await?;
        return Err(Error::InvalidArgument(format!(
          "folder {} belongs to another owner",
          parent.id
        )));
      }
      if descendants_in(&tree, id).iter().any(|f| f.id == target) {
        return Err(Error::StructuralIntegrity(format!(
          "folder {id} cannot be moved beneath its descendant {target}"
        )));
      }
    }

    if let Some(entry) = tree.get_mut(id) {
      entry.parent_id = parent_id.map(str::to_owned);
    }

    let mut ops = self.path_ops(&tree, id)?;
    ops.insert(
      0,
      self
        .folders
        .update_op(Filter::by_id(id), Patch::new().set("parent_id", parent_id))?,
    );
    self.folders.apply(ops).await?;

    info!(folder_id = id, parent_id, "moved folder");
    self.folders.get(id).await
  }

  /// Path updates for `id` and every descendant, computed from `tree`.
  fn path_ops(&self, tree: &Tree, id: &str) -> Result<Vec<WriteOp>> {
    let descendants = descendants_in(tree, id);
    std::iter::once(id)
      .chain(descendants.iter().map(|f| f.id.as_str()))
      .map(|folder_id| {
        let path = resolve_path(tree, folder_id)?;
        self
          .folders
          .update_op(Filter::by_id(folder_id), Patch::new().set("path", path))
      })
      .collect()
  }

  /// Delete `id`. With `cascade`, its whole subtree and every document filed
  /// in it go too; without, a folder that still holds anything is refused.
  pub async fn delete(&self, id: &str, cascade: bool) -> Result<DeleteSummary> {
    let _guard = self.structure_lock.lock().await;

    let folder = self.folders.get(id).await?;
    let tree = self.tree_for_owner(&folder.owner_id).await?;
    let descendants = descendants_in(&tree, id);

    if !cascade {
      let documents = self.documents.count(&Filter::new().eq("folder_id", id)).await?;
      if !descendants.is_empty() || documents > 0 {
        return Err(Error::StructuralIntegrity(format!(
          "folder {id} is not empty ({} subfolders, {documents} documents)",
          descendants.len()
        )));
      }
    }

    let mut ops = Vec::new();
    for folder_id in std::iter::once(id).chain(descendants.iter().map(|f| f.id.as_str())) {
      ops.push(self.documents.delete_op(Filter::new().eq("folder_id", folder_id))?);
      ops.push(self.folders.delete_op(Filter::by_id(folder_id))?);
    }
    let counts = self.folders.apply(ops).await?;

    let mut summary = DeleteSummary::default();
    for pair in counts.chunks(2) {
      summary.documents += pair[0];
      summary.folders += pair.get(1).copied().unwrap_or_default();
    }
    info!(
      folder_id = id,
      cascade,
      folders = summary.folders,
      documents = summary.documents,
      "deleted folder"
    );
    Ok(summary)
  }

  // ── Maintenance ───────────────────────────────────────────────────────────

  /// Folders whose stored path disagrees with their parent chain. Without
  /// an owner every folder is checked.
  pub async fn verify_paths(&self, owner_id: Option<&str>) -> Result<Vec<PathIssue>> {
    let filter = Filter::new().eq_opt("owner_id", owner_id);
    let tree = tree_of(self.folders.find(&filter).await?);

    let mut ids: Vec<&String> = tree.keys().collect();
    ids.sort();

    let mut issues = Vec::new();
    for id in ids {
      let stored = &tree[id].path;
      match resolve_path(&tree, id) {
        Ok(expected) if expected == *stored => {}
        Ok(expected) => issues.push(PathIssue::Stale {
          folder_id: id.clone(),
          stored: stored.clone(),
          expected,
        }),
        Err(e) => issues.push(PathIssue::Broken {
          folder_id: id.clone(),
          reason:    e.to_string(),
        }),
      }
    }
    Ok(issues)
  }

  /// Rewrite every stale path. Broken chains are left alone and returned.
  pub async fn repair_paths(&self, owner_id: Option<&str>) -> Result<(u64, Vec<PathIssue>)> {
    let _guard = self.structure_lock.lock().await;

    let mut ops = Vec::new();
    let mut broken = Vec::new();
    for issue in self.verify_paths(owner_id).await? {
      match issue {
        PathIssue::Stale { folder_id, expected, .. } => ops.push(
          self
            .folders
            .update_op(Filter::by_id(folder_id), Patch::new().set("path", expected))?,
        ),
        PathIssue::Broken { ref folder_id, ref reason } => {
          warn!(folder_id = %folder_id, reason = %reason, "cannot repair folder path");
          broken.push(issue);
        }
      }
    }

    let repaired = self.folders.apply(ops).await?.into_iter().sum();
    Ok((repaired, broken))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn folder(id: &str, name: &str, parent: Option<&str>) -> Folder {
    Folder {
      id:         id.to_owned(),
      owner_id:   "u1".to_owned(),
      name:       name.to_owned(),
      parent_id:  parent.map(str::to_owned),
      path:       String::new(),
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  fn tree(folders: &[Folder]) -> Tree { tree_of(folders.to_vec()) }

  #[test]
  fn path_joins_names_from_root() {
    let tree = tree(&[
      folder("a", "A", None),
      folder("b", "B", Some("a")),
      folder("c", "C", Some("b")),
    ]);
    assert_eq!(resolve_path(&tree, "c").unwrap(), "A/B/C");
    assert_eq!(resolve_path(&tree, "a").unwrap(), "A");
  }

  #[test]
  fn cycles_are_structural_errors() {
    let tree = tree(&[folder("a", "A", Some("b")), folder("b", "B", Some("a"))]);
    let err = resolve_path(&tree, "a").unwrap_err();
    assert!(matches!(err, Error::StructuralIntegrity(_)));

    let selfish = tree_of(vec![folder("s", "S", Some("s"))]);
    assert!(matches!(resolve_path(&selfish, "s"), Err(Error::StructuralIntegrity(_))));
  }

  #[test]
  fn dangling_parent_is_structural_error() {
    let tree = tree(&[folder("a", "A", Some("gone"))]);
    assert!(matches!(resolve_path(&tree, "a"), Err(Error::StructuralIntegrity(_))));
  }

  #[test]
  fn depth_is_bounded() {
    let mut folders = vec![folder("f0", "0", None)];
    for i in 1..=MAX_DEPTH + 1 {
      let parent = format!("f{}", i - 1);
      folders.push(folder(&format!("f{i}"), &i.to_string(), Some(&parent)));
    }
    let tree = tree_of(folders);

    assert!(resolve_path(&tree, &format!("f{MAX_DEPTH}")).is_ok());
    let err = resolve_path(&tree, &format!("f{}", MAX_DEPTH + 1)).unwrap_err();
    assert!(matches!(err, Error::StructuralIntegrity(_)));
  }

  #[test]
  fn descendants_are_breadth_first() {
    let tree = tree(&[
      folder("a", "A", None),
      folder("b", "B", Some("a")),
      folder("c", "C", Some("b")),
      folder("d", "D", Some("a")),
      folder("x", "X", None),
    ]);
    let mut found: Vec<&str> = descendants_in(&tree, "a").iter().map(|f| f.id.as_str()).collect();
    assert_eq!(found.pop(), Some("c"));
    found.sort();
    assert_eq!(found, ["b", "d"]);
    assert!(descendants_in(&tree, "x").is_empty());
  }

  #[test]
  fn names_are_validated() {
    assert!(validate_name("Reports").is_ok());
    assert!(validate_name("").is_err());
    assert!(validate_name("   ").is_err());
    assert!(validate_name("a/b").is_err());
  }
}
