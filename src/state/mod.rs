//! Persisted state files
//!
//! Every store (projects, worktree inventory, sessions, run journal) is a single
//! JSON document under the state directory. Saves take an exclusive lock file and
//! write through a temp file + rename so a crash never leaves a torn document.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};

pub const PROJECTS_FILE: &str = "projects.json";
pub const WORKTREES_FILE: &str = "worktrees.json";
pub const SESSIONS_FILE: &str = "sessions.json";
pub const RUNS_FILE: &str = "runs.json";
pub const LOGS_DIR: &str = "logs";
pub const BRIDGE_LOCK: &str = "bridge.lock";

/// Exclusive ownership of a state directory, held for the life of a bridge.
///
/// Scheduling state lives in memory, so two bridges on one state directory would
/// hand out colliding run ids and fail each other's runs on startup.
#[derive(Debug)]
pub struct StateLock {
    _file: fs::File,
}

impl StateLock {
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).map_err(|e| BridgeError::io(state_dir, e))?;
        let path = state_dir.join(BRIDGE_LOCK);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| BridgeError::io(&path, e))?;
        file.try_lock_exclusive().map_err(|_| BridgeError::Store {
            path: path.clone(),
            message: "another chatrelay process is using this state directory".to_string(),
        })?;
        Ok(Self { _file: file })
    }
}

/// A JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or `T::default()` if the file does not exist yet.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if !self.path.exists() {
            return Ok(T::default());
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| BridgeError::io(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(T::default());
        }

        serde_json::from_str(&content).map_err(|e| BridgeError::Store {
            path: self.path.clone(),
            message: format!("failed to parse: {}", e),
        })
    }

    /// Save with exclusive lock and atomic rename.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| BridgeError::io(parent, e))?;
        }

        let content = serde_json::to_string_pretty(value).map_err(|e| BridgeError::Store {
            path: self.path.clone(),
            message: format!("failed to serialize: {}", e),
        })?;

        // Separate lock file so the rename below never swaps out the locked inode
        let lock_path = self.path.with_extension("json.lock");
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| BridgeError::io(&lock_path, e))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| BridgeError::io(&lock_path, e))?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| BridgeError::io(&temp_path, e))?;
        temp_file
            .write_all(content.as_bytes())
            .and_then(|_| temp_file.sync_all())
            .map_err(|e| BridgeError::io(&temp_path, e))?;

        fs::rename(&temp_path, &self.path).map_err(|e| BridgeError::io(&self.path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let file = JsonFile::in_dir(dir.path(), "absent.json");
        let value: BTreeMap<String, u32> = file.load_or_default().unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let file = JsonFile::in_dir(&dir.path().join("nested"), "state.json");

        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        file.save(&value).unwrap();

        let loaded: BTreeMap<String, u32> = file.load_or_default().unwrap();
        assert_eq!(loaded, value);
        assert!(!file.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = TempDir::new().unwrap();
        let file = JsonFile::in_dir(dir.path(), "bad.json");
        fs::write(file.path(), "{not json").unwrap();

        let result: Result<BTreeMap<String, u32>> = file.load_or_default();
        assert!(matches!(result, Err(BridgeError::Store { .. })));
    }

    #[test]
    fn state_lock_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let held = StateLock::acquire(dir.path()).unwrap();
        assert!(matches!(
            StateLock::acquire(dir.path()),
            Err(BridgeError::Store { .. })
        ));

        drop(held);
        assert!(StateLock::acquire(dir.path()).is_ok());
    }
}
