use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ChatContext, ConversationRef, WorktreeKey};

/// Unique identifier for a run
pub type RunId = u64;

/// Why a run ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The process produced no output and did not exit within the inactivity ceiling
    Timeout,
    /// Non-zero or abnormal exit that was not caused by cancellation or timeout
    ProcessFailure {
        kind: ProcessFailureKind,
        message: String,
        #[serde(default)]
        exit_code: Option<i32>,
    },
    /// The bridge restarted while the run was in flight
    SupervisorRestart,
}

impl FailureReason {
    pub fn process(kind: ProcessFailureKind, message: impl Into<String>) -> Self {
        Self::ProcessFailure {
            kind,
            message: message.into(),
            exit_code: None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::ProcessFailure { kind, message, .. } => {
                write!(f, "{}: {}", kind, message)
            }
            FailureReason::SupervisorRestart => write!(f, "supervisor restart"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessFailureKind {
    /// The process exited unsuccessfully or reported failure in its final frame
    Exit,
    /// The process could not be launched
    Spawn,
    /// The engine no longer knows the conversation we asked it to resume
    ConversationExpired,
    /// The supervisor itself panicked
    Panic,
}

impl fmt::Display for ProcessFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessFailureKind::Exit => "process failure",
            ProcessFailureKind::Spawn => "spawn failure",
            ProcessFailureKind::ConversationExpired => "conversation expired",
            ProcessFailureKind::Panic => "supervisor panic",
        };
        f.write_str(s)
    }
}

/// Run lifecycle: Queued → Running → {Completed, Failed, Cancelled}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunState {
    Queued,
    Running,
    Completed,
    Failed(FailureReason),
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed(_) | RunState::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed(_) => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Failed(reason) => write!(f, "failed ({})", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// A single execution request as handed to the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub key: WorktreeKey,

    /// Resolved working directory for the agent process
    pub worktree_path: std::path::PathBuf,

    /// Engine id to invoke
    pub engine: String,

    /// Conversation to resume, or `None` for a fresh one
    #[serde(default)]
    pub conversation: Option<ConversationRef>,

    /// Input payload (the user's prompt)
    pub input: String,

    /// Chat context that asked for this run, if any
    #[serde(default)]
    pub context: Option<ChatContext>,
}

/// How a run ended, as reported by whoever executed it
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub state: RunState,
    /// Final answer text reported by the agent
    pub answer: Option<String>,
    /// Conversation the agent ended up in (may be new)
    pub conversation: Option<ConversationRef>,
}

impl RunOutcome {
    pub fn completed(answer: Option<String>, conversation: Option<ConversationRef>) -> Self {
        Self {
            state: RunState::Completed,
            answer,
            conversation,
        }
    }

    pub fn failed(reason: FailureReason, conversation: Option<ConversationRef>) -> Self {
        Self {
            state: RunState::Failed(reason),
            answer: None,
            conversation,
        }
    }

    pub fn cancelled(conversation: Option<ConversationRef>) -> Self {
        Self {
            state: RunState::Cancelled,
            answer: None,
            conversation,
        }
    }
}

/// Point-in-time view of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: RunId,
    pub seq: u64,
    pub key: WorktreeKey,
    pub engine: String,
    #[serde(default)]
    pub conversation: Option<ConversationRef>,
    #[serde(default)]
    pub context: Option<ChatContext>,
    pub state: RunState,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}
