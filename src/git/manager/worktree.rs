//! Worktree operations for GitManager

use std::path::{Path, PathBuf};

use super::GitManager;
use crate::error::{BridgeError, Result};

/// Where a new worktree's branch came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorktreeSource {
    /// Existing local branch checked out as-is
    Local,
    /// New local branch tracking `origin/<branch>`
    Remote,
    /// New branch created from a base ref
    NewFrom(String),
}

/// One entry of `git worktree list --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Short branch name, `None` when detached
    pub branch: Option<String>,
}

impl GitManager {
    /// Create a worktree for `branch` at `path`.
    ///
    /// Uses the local branch if it exists, else creates a tracking branch from
    /// `origin/<branch>`, else a new branch from [`GitManager::default_base`].
    pub fn add_worktree(&self, path: &Path, branch: &str) -> Result<WorktreeSource> {
        if !self.has_commits() {
            return Err(BridgeError::git(
                "worktree add",
                "repository has no commits; make an initial commit first",
            ));
        }

        let source = if self.local_branch_exists(branch) {
            WorktreeSource::Local
        } else if self.remote_branch_exists(branch) {
            WorktreeSource::Remote
        } else {
            let base = self.default_base().ok_or_else(|| {
                BridgeError::git(
                    "worktree add",
                    format!("cannot determine base branch for new branch {}", branch),
                )
            })?;
            WorktreeSource::NewFrom(base)
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BridgeError::io(parent, e))?;
        }

        let path_str = path.to_str().ok_or_else(|| BridgeError::WorktreeConflict {
            path: path.to_path_buf(),
            reason: "path contains invalid UTF-8".to_string(),
        })?;

        match &source {
            WorktreeSource::Local => {
                self.run(&["worktree", "add", path_str, branch])?;
            }
            WorktreeSource::Remote => {
                let upstream = format!("origin/{}", branch);
                self.run(&["worktree", "add", "--track", "-b", branch, path_str, &upstream])?;
            }
            WorktreeSource::NewFrom(base) => {
                self.run(&["worktree", "add", "-b", branch, path_str, base])?;
            }
        }

        tracing::debug!(branch, path = %path.display(), ?source, "created worktree");
        Ok(source)
    }

    /// Remove the worktree at `path`. The branch is left alone.
    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        if path.exists() {
            let path_str = path.to_str().ok_or_else(|| BridgeError::WorktreeConflict {
                path: path.to_path_buf(),
                reason: "path contains invalid UTF-8".to_string(),
            })?;
            self.run(&["worktree", "remove", "--force", path_str])?;
        } else {
            // Directory already gone; drop git's stale administrative entry
            if let Err(e) = self.run(&["worktree", "prune"]) {
                tracing::warn!("Failed to prune worktrees: {}", e);
            }
        }
        Ok(())
    }

    /// All worktrees of this repository, the main checkout included.
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let stdout = self.run(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&stdout))
    }

    /// True if `path` is a registered worktree of this repository.
    pub fn is_worktree(&self, path: &Path) -> bool {
        if !path.is_dir() {
            return false;
        }
        let Ok(target) = path.canonicalize() else {
            return false;
        };

        self.list_worktrees()
            .map(|entries| {
                entries.iter().any(|entry| {
                    entry
                        .path
                        .canonicalize()
                        .map(|p| p == target)
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }
}

pub(super) fn parse_worktree_list(stdout: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in stdout.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(reference) = line.strip_prefix("branch ") {
            if let Some(entry) = current.as_mut() {
                let short = reference.strip_prefix("refs/heads/").unwrap_or(reference);
                entry.branch = Some(short.to_string());
            }
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}
