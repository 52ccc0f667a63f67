//! Git manager implementation

mod worktree;


pub use worktree::{WorktreeEntry, WorktreeSource};

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::{BridgeError, Result};

/// Find the git repository root for a given path.
/// Returns None if the path is not inside a git repository.
pub fn find_git_root(path: &Path) -> Option<PathBuf> {
    let start_dir = if path.is_file() { path.parent()? } else { path };

    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(start_dir)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if root.is_empty() {
        None
    } else {
        Some(PathBuf::from(root))
    }
}

/// Git operations against one project's main checkout.
///
/// All calls are blocking; async callers go through `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct GitManager {
    root: PathBuf,
}

impl GitManager {
    /// Open a repository root. Fails if `root` is not the top of a git checkout.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.join(".git").exists() {
            return Err(BridgeError::git(
                "rev-parse",
                format!("not a git repository: {}", root.display()),
            ));
        }

        Ok(Self { root })
    }

    /// Get the root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run git in `dir`, returning the raw output. Fails only if git cannot be launched.
    pub(super) fn output_in(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| BridgeError::git(args.join(" "), format!("git not available: {}", e)))
    }

    /// Run git in the root and return trimmed stdout, or a `Git` error with stderr.
    pub(super) fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output_in(&self.root, args)?;
        if !output.status.success() {
            return Err(BridgeError::git(
                args.join(" "),
                String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// True if git exits successfully
    pub(super) fn ok(&self, args: &[&str]) -> bool {
        self.output_in(&self.root, args)
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Check if the repository has at least one commit
    pub fn has_commits(&self) -> bool {
        self.ok(&["rev-parse", "--verify", "--quiet", "HEAD"])
    }

    /// Branch checked out in the root, or `None` when HEAD is detached or unborn.
    pub fn current_branch(&self) -> Option<String> {
        let branch = self
            .run(&["symbolic-ref", "--quiet", "--short", "HEAD"])
            .ok()?;
        (!branch.is_empty()).then_some(branch)
    }

    pub fn local_branch_exists(&self, branch: &str) -> bool {
        let reference = format!("refs/heads/{}", branch);
        self.ok(&["show-ref", "--verify", "--quiet", &reference])
    }

    pub fn remote_branch_exists(&self, branch: &str) -> bool {
        let reference = format!("refs/remotes/origin/{}", branch);
        self.ok(&["show-ref", "--verify", "--quiet", &reference])
    }

    /// Base for new branches: `origin/HEAD`, then `main`, `master`, then whatever
    /// the root has checked out.
    pub fn default_base(&self) -> Option<String> {
        if let Ok(remote_head) =
            self.run(&["symbolic-ref", "--quiet", "--short", "refs/remotes/origin/HEAD"])
        {
            if !remote_head.is_empty() {
                return Some(remote_head);
            }
        }

        for candidate in ["main", "master"] {
            if self.local_branch_exists(candidate) {
                return Some(candidate.to_string());
            }
        }

        if self.has_commits() {
            return self.current_branch();
        }

        None
    }
}
