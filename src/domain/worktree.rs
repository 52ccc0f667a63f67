use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::ProjectName;
use crate::error::{BridgeError, Result};

/// Characters git refuses in ref names that also make unsafe path segments.
const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// A branch name that is safe to use both as a git ref and as a relative path
/// under the worktrees directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Validate a branch name. Surrounding whitespace is trimmed.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        let name = raw.trim();
        let invalid = |reason| BridgeError::InvalidBranchName {
            name: raw.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("cannot be empty"));
        }
        if name.starts_with('/') {
            return Err(invalid("cannot start with '/'"));
        }
        if name.starts_with('-') {
            return Err(invalid("cannot start with '-'"));
        }
        if name.ends_with('/') || name.ends_with('.') {
            return Err(invalid("cannot end with '/' or '.'"));
        }
        if name.contains("..") {
            return Err(invalid("cannot contain '..'"));
        }
        if name.contains("//") {
            return Err(invalid("cannot contain '//'"));
        }
        if name.contains("@{") || name == "@" {
            return Err(invalid("cannot contain '@{' or be '@'"));
        }
        if name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_CHARS.contains(&c))
        {
            return Err(invalid("contains whitespace or a character git rejects"));
        }
        for component in name.split('/') {
            if component.starts_with('.') {
                return Err(invalid("path components cannot start with '.'"));
            }
            if component.ends_with(".lock") {
                return Err(invalid("path components cannot end with '.lock'"));
            }
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(value: BranchName) -> Self {
        value.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scheduling and inventory key. `branch == None` is the project's root checkout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorktreeKey {
    pub project: ProjectName,
    #[serde(default)]
    pub branch: Option<BranchName>,
}

impl WorktreeKey {
    pub fn new(project: ProjectName, branch: Option<BranchName>) -> Self {
        Self { project, branch }
    }

    pub fn root(project: ProjectName) -> Self {
        Self {
            project,
            branch: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.branch.is_none()
    }
}

impl fmt::Display for WorktreeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.branch {
            Some(branch) => write!(f, "{}@{}", self.project, branch),
            None => write!(f, "{}", self.project),
        }
    }
}

/// A live worktree on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worktree {
    pub project: ProjectName,
    pub branch: BranchName,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Worktree {
    pub fn key(&self) -> WorktreeKey {
        WorktreeKey::new(self.project.clone(), Some(self.branch.clone()))
    }
}
