//! Error taxonomy for the orchestration core

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced synchronously by the core operations.
///
/// Run-level failures (timeouts, crashed agents, cancellation) are not returned
/// from `submit`; they end up in the run's terminal progress event and state.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid branch name {name:?}: {reason}")]
    InvalidBranchName { name: String, reason: &'static str },

    #[error("invalid project name {name:?}: {reason}")]
    InvalidProjectName { name: String, reason: &'static str },

    #[error("invalid engine {id:?}: {reason}")]
    InvalidEngine { id: String, reason: &'static str },

    #[error("worktree {key} is busy: a run holds it")]
    WorktreeBusy { key: String },

    #[error("worktree path {} exists but {reason}", path.display())]
    WorktreeConflict { path: PathBuf, reason: String },

    #[error("malformed resume token: {0}")]
    MalformedToken(String),

    #[error("unsupported resume token version {0}")]
    UnsupportedVersion(u32),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("project {name} is already registered at {}", path.display())]
    ProjectExists { name: String, path: PathBuf },

    #[error("chat context {0} is already bound to another session; rebind it instead")]
    ContextBound(String),

    #[error("process produced no output for {0:?}")]
    Timeout(std::time::Duration),

    #[error("agent process failed: {0}")]
    ProcessFailure(String),

    #[error("run was cancelled")]
    Cancelled,

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state store {}: {message}", path.display())]
    Store { path: PathBuf, message: String },
}

impl BridgeError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn git(command: impl Into<String>, stderr: impl AsRef<str>) -> Self {
        Self::Git {
            command: command.into(),
            stderr: stderr.as_ref().trim().to_string(),
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
