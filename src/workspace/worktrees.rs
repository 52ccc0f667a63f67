//! Per-branch worktree lifecycle
//!
//! The manager maps a `(project, branch)` key to exactly one worktree directory under
//! `<project root>/<worktrees dir>/<branch>`. Concurrent `ensure` calls for one key are
//! serialized by a per-key async lock, so they collapse into a single git operation
//! and all observe the same path. Different keys never wait on each other.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use super::ProjectRegistry;
use crate::domain::{BranchName, Project, ProjectName, Worktree, WorktreeKey};
use crate::error::{BridgeError, Result};
use crate::git::GitManager;
use crate::state::{JsonFile, WORKTREES_FILE};

/// Answers whether a run currently holds (or waits on) a key
pub trait KeyOccupancy: Send + Sync {
    fn is_occupied(&self, key: &WorktreeKey) -> bool;
}

/// A canonical key and the directory runs on it execute in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWorktree {
    pub key: WorktreeKey,
    pub path: PathBuf,
}

/// Holds a key's worktree lock; the project root key is never removed, so it has none
#[must_use]
#[derive(Debug)]
pub struct KeyGuard(Option<OwnedMutexGuard<()>>);

pub struct WorktreeManager {
    projects: Arc<ProjectRegistry>,
    occupancy: Arc<dyn KeyOccupancy>,
    worktrees_dir: PathBuf,
    inventory: Mutex<HashMap<WorktreeKey, Worktree>>,
    file: JsonFile,
    locks: Mutex<HashMap<WorktreeKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorktreeManager {
    /// Open the manager, loading the inventory from `<state_dir>/worktrees.json`.
    ///
    /// `worktrees_dir` is relative to each project root (e.g. `.worktrees`).
    pub fn open(
        projects: Arc<ProjectRegistry>,
        occupancy: Arc<dyn KeyOccupancy>,
        state_dir: &Path,
        worktrees_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let file = JsonFile::in_dir(state_dir, WORKTREES_FILE);
        let entries: Vec<Worktree> = file.load_or_default()?;
        let inventory = entries.into_iter().map(|w| (w.key(), w)).collect();

        Ok(Self {
            projects,
            occupancy,
            worktrees_dir: worktrees_dir.into(),
            inventory: Mutex::new(inventory),
            file,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Ensure a worktree exists for `branch` and return its path.
    ///
    /// A branch that is checked out in the project root resolves to the root.
    pub async fn ensure(&self, project: &ProjectName, branch: &str) -> Result<PathBuf> {
        Ok(self.resolve(project, Some(branch)).await?.path)
    }

    /// Canonicalize `(project, branch)` and make sure its directory exists.
    pub async fn resolve(
        &self,
        project: &ProjectName,
        branch: Option<&str>,
    ) -> Result<ResolvedWorktree> {
        let (resolved, _guard) = self.resolve_held(project, branch).await?;
        Ok(resolved)
    }

    /// Like `resolve`, but keeps the key locked until the returned guard is dropped.
    ///
    /// `remove` takes the same lock, so a caller that queues a run before dropping the
    /// guard can never have the directory removed underneath that run.
    pub async fn resolve_held(
        &self,
        project: &ProjectName,
        branch: Option<&str>,
    ) -> Result<(ResolvedWorktree, KeyGuard)> {
        let branch = branch.map(BranchName::new).transpose()?;
        let project = self.projects.get(project)?;

        let Some(branch) = branch else {
            return Ok((root_worktree(&project), KeyGuard(None)));
        };

        let git = GitManager::new(&project.root)?;
        if is_root_branch(&git, &branch).await? {
            return Ok((root_worktree(&project), KeyGuard(None)));
        }

        let key = WorktreeKey::new(project.name.clone(), Some(branch.clone()));
        let path = self.worktree_path(&project, &branch)?;

        let guard = self.key_lock(&key).lock_owned().await;

        let known = self.inventory_get(&key);
        let worktree = {
            let path = path.clone();
            let branch = branch.clone();
            tokio::task::spawn_blocking(move || locate_or_create(&git, &path, &branch, known))
                .await
                .map_err(|e| BridgeError::git("worktree add", e.to_string()))??
        };

        if let Some(created_at) = worktree {
            let entry = Worktree {
                project: project.name.clone(),
                branch,
                path: path.clone(),
                created_at,
            };
            self.inventory_put(entry)?;
        }

        Ok((ResolvedWorktree { key, path }, KeyGuard(Some(guard))))
    }

    /// Remove the worktree for `branch`. Fails with `WorktreeBusy` while a run holds
    /// or waits on the key. The branch itself is kept.
    pub async fn remove(&self, project: &ProjectName, branch: &str) -> Result<()> {
        let branch = BranchName::new(branch)?;
        let project = self.projects.get(project)?;
        let key = WorktreeKey::new(project.name.clone(), Some(branch.clone()));

        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        if self.occupancy.is_occupied(&key) {
            return Err(BridgeError::WorktreeBusy {
                key: key.to_string(),
            });
        }

        let path = match self.inventory_get(&key) {
            Some(entry) => entry.path,
            None => {
                let path = self.worktree_path(&project, &branch)?;
                if !path.exists() {
                    return Err(BridgeError::not_found("worktree", key.to_string()));
                }
                path
            }
        };

        let git = GitManager::new(&project.root)?;
        {
            let path = path.clone();
            tokio::task::spawn_blocking(move || {
                if path.exists() && !git.is_worktree(&path) {
                    return Err(BridgeError::WorktreeConflict {
                        path,
                        reason: "is not a git worktree".to_string(),
                    });
                }
                git.remove_worktree(&path)
            })
            .await
            .map_err(|e| BridgeError::git("worktree remove", e.to_string()))??;
        }

        self.inventory_remove(&key)?;
        tracing::info!(key = %key, path = %path.display(), "removed worktree");
        Ok(())
    }

    /// Known worktrees of a project, sorted by branch
    pub fn list(&self, project: &ProjectName) -> Result<Vec<Worktree>> {
        self.projects.get(project)?;
        let inventory = self.inventory.lock().unwrap_or_else(|e| e.into_inner());
        let mut worktrees: Vec<Worktree> = inventory
            .values()
            .filter(|w| &w.project == project)
            .cloned()
            .collect();
        worktrees.sort_by(|a, b| a.branch.cmp(&b.branch));
        Ok(worktrees)
    }

    /// Drop every inventory entry of a project (used when the project is removed)
    pub fn forget_project(&self, project: &ProjectName) -> Result<()> {
        let mut inventory = self.inventory.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = inventory.clone();
        next.retain(|key, _| &key.project != project);
        self.commit(&mut inventory, next)
    }

    fn worktree_path(&self, project: &Project, branch: &BranchName) -> Result<PathBuf> {
        let root = project.root.join(&self.worktrees_dir);
        let path = root.join(branch.as_str());
        ensure_within_root(&root, &path)?;
        Ok(path)
    }

    fn key_lock(&self, key: &WorktreeKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    fn inventory_get(&self, key: &WorktreeKey) -> Option<Worktree> {
        self.inventory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn inventory_put(&self, worktree: Worktree) -> Result<()> {
        let mut inventory = self.inventory.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = inventory.clone();
        next.insert(worktree.key(), worktree);
        self.commit(&mut inventory, next)
    }

    fn inventory_remove(&self, key: &WorktreeKey) -> Result<()> {
        let mut inventory = self.inventory.lock().unwrap_or_else(|e| e.into_inner());
        if !inventory.contains_key(key) {
            return Ok(());
        }
        let mut next = inventory.clone();
        next.remove(key);
        self.commit(&mut inventory, next)
    }

    /// Write `next` to disk, then make it the live inventory
    fn commit(
        &self,
        live: &mut HashMap<WorktreeKey, Worktree>,
        next: HashMap<WorktreeKey, Worktree>,
    ) -> Result<()> {
        let mut entries: Vec<&Worktree> = next.values().collect();
        entries.sort_by(|a, b| a.key().cmp(&b.key()));
        self.file.save(&entries)?;
        *live = next;
        Ok(())
    }
}

fn root_worktree(project: &Project) -> ResolvedWorktree {
    ResolvedWorktree {
        key: WorktreeKey::root(project.name.clone()),
        path: project.root.clone(),
    }
}

async fn is_root_branch(git: &GitManager, branch: &BranchName) -> Result<bool> {
    let git = git.clone();
    let current = tokio::task::spawn_blocking(move || git.current_branch())
        .await
        .map_err(|e| BridgeError::git("symbolic-ref", e.to_string()))?;
    Ok(current.as_deref() == Some(branch.as_str()))
}

/// Returns `Some(created_at)` when the inventory needs a (new or refreshed) entry.
fn locate_or_create(
    git: &GitManager,
    path: &Path,
    branch: &BranchName,
    known: Option<Worktree>,
) -> Result<Option<chrono::DateTime<Utc>>> {
    if path.exists() {
        if !git.is_worktree(path) {
            return Err(BridgeError::WorktreeConflict {
                path: path.to_path_buf(),
                reason: "is not a git worktree".to_string(),
            });
        }
        return Ok(match known {
            Some(entry) if entry.path == path => None,
            _ => {
                tracing::debug!(path = %path.display(), "adopting existing worktree");
                Some(Utc::now())
            }
        });
    }

    if known.is_some() {
        // Directory vanished behind our back; clear git's stale entry first
        git.remove_worktree(path)?;
    }
    git.add_worktree(path, branch.as_str())?;
    Ok(Some(Utc::now()))
}

fn ensure_within_root(root: &Path, path: &Path) -> Result<()> {
    let escapes = path
        .strip_prefix(root)
        .map(|rel| {
            rel.components()
                .any(|c| !matches!(c, Component::Normal(_)))
        })
        .unwrap_or(true);

    if escapes {
        return Err(BridgeError::WorktreeConflict {
            path: path.to_path_buf(),
            reason: format!("escapes the worktrees directory {}", root.display()),
        });
    }
    Ok(())
}
