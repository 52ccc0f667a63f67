use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationRef, RunId, RunState};

/// What happened to a file the agent touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for FileChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileChangeKind::Added => write!(f, "added"),
            FileChangeKind::Modified => write!(f, "modified"),
            FileChangeKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// Terminal payload of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub state: RunState,

    /// Final answer text, if the agent produced one
    #[serde(default)]
    pub answer: Option<String>,

    /// Conversation to continue from
    #[serde(default)]
    pub conversation: Option<ConversationRef>,

    /// Resume token for the binding this run executed under
    #[serde(default)]
    pub resume_token: Option<String>,
}

/// The kind of progress event published by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    /// A line of status text (agent prose, stderr, unrecognized output)
    Status { text: String },

    /// The agent is calling a tool
    ToolInvocation {
        tool: String,
        summary: String,
        #[serde(default)]
        args: Option<serde_json::Value>,
    },

    /// The agent changed a file in the worktree
    FileChange { path: String, change: FileChangeKind },

    /// Periodic elapsed-time tick
    Tick { elapsed_ms: u64 },

    /// The run ended. Always the last event of a run.
    Result(RunResult),
}

impl ProgressKind {
    pub fn status(text: impl Into<String>) -> Self {
        Self::Status { text: text.into() }
    }

    pub fn tool(tool: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool: tool.into(),
            summary: summary.into(),
            args: None,
        }
    }

    pub fn file(path: impl Into<String>, change: FileChangeKind) -> Self {
        Self::FileChange {
            path: path.into(),
            change,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressKind::Result(_))
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        match self {
            ProgressKind::Status { text } => text.clone(),
            ProgressKind::ToolInvocation { tool, summary, .. } => {
                format!("[{}] {}", tool, summary)
            }
            ProgressKind::FileChange { path, change } => format!("{} {}", change, path),
            ProgressKind::Tick { elapsed_ms } => format!("elapsed {}s", elapsed_ms / 1000),
            ProgressKind::Result(result) => match &result.answer {
                Some(answer) => format!("{}: {}", result.state, answer),
                None => result.state.to_string(),
            },
        }
    }
}

/// A progress event with its run-relative sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: RunId,

    /// Strictly increasing per run, starting at 1
    pub seq: u64,

    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: ProgressKind,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
