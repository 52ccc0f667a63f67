//! Project registry
//!
//! Projects are registered explicitly and are immutable afterwards. The registry is
//! shared behind an `Arc`. Mutations are written to `projects.json` first and only
//! become visible once the write succeeded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::domain::{Project, ProjectName};
use crate::error::{BridgeError, Result};
use crate::git::find_git_root;
use crate::state::{JsonFile, PROJECTS_FILE};

/// Registry of known projects, keyed by name
#[derive(Debug)]
pub struct ProjectRegistry {
    projects: RwLock<BTreeMap<ProjectName, Project>>,
    file: JsonFile,
}

impl ProjectRegistry {
    /// Load the registry from `<state_dir>/projects.json`
    pub fn open(state_dir: &Path) -> Result<Self> {
        let file = JsonFile::in_dir(state_dir, PROJECTS_FILE);
        let projects = file.load_or_default()?;
        Ok(Self {
            projects: RwLock::new(projects),
            file,
        })
    }

    /// Register a project rooted at a git repository.
    ///
    /// Registering the same name at the same path again is a no-op that returns the
    /// existing project; the same name at another path fails with `ProjectExists`.
    pub fn register(
        &self,
        name: &str,
        root: &Path,
        default_engine: Option<String>,
    ) -> Result<Project> {
        let name = ProjectName::new(name)?;
        let root = repository_root(root)?;

        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = projects.get(&name) {
            if existing.root == root {
                return Ok(existing.clone());
            }
            return Err(BridgeError::ProjectExists {
                name: name.to_string(),
                path: existing.root.clone(),
            });
        }

        let mut project = Project::new(name.clone(), root);
        project.default_engine = default_engine;
        let mut next = projects.clone();
        next.insert(name, project.clone());
        self.file.save(&next)?;
        *projects = next;

        tracing::info!(project = %project.name, root = %project.root.display(), "registered project");
        Ok(project)
    }

    pub fn get(&self, name: &ProjectName) -> Result<Project> {
        self.projects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("project", name.as_str()))
    }

    /// Look a project up by raw name
    pub fn lookup(&self, name: &str) -> Result<Project> {
        let name =
            ProjectName::new(name).map_err(|_| BridgeError::not_found("project", name))?;
        self.get(&name)
    }

    /// All projects, sorted by name
    pub fn list(&self) -> Vec<Project> {
        self.projects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn remove(&self, name: &ProjectName) -> Result<Project> {
        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        let mut next = projects.clone();
        let removed = next
            .remove(name)
            .ok_or_else(|| BridgeError::not_found("project", name.as_str()))?;
        self.file.save(&next)?;
        *projects = next;
        Ok(removed)
    }

    /// The only registered project, if there is exactly one
    pub fn sole(&self) -> Option<Project> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        if projects.len() == 1 {
            projects.values().next().cloned()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.projects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical top-level path of the repository at `path`.
fn repository_root(path: &Path) -> Result<PathBuf> {
    let canonical = path.canonicalize().map_err(|e| BridgeError::io(path, e))?;
    let top = find_git_root(&canonical)
        .and_then(|root| root.canonicalize().ok())
        .ok_or_else(|| {
            BridgeError::git(
                "rev-parse --show-toplevel",
                format!("not a git repository: {}", canonical.display()),
            )
        })?;

    if top != canonical {
        return Err(BridgeError::git(
            "rev-parse --show-toplevel",
            format!(
                "{} is inside repository {}; register the repository root",
                canonical.display(),
                top.display()
            ),
        ));
    }
    Ok(canonical)
}
