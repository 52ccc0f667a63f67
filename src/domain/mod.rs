//! Core domain types for chatrelay

mod event;
mod project;
mod run;
mod session;
mod worktree;

pub use event::{FileChangeKind, ProgressEvent, ProgressKind, RunResult};
pub use project::{Project, ProjectName};
pub use run::{
    FailureReason, ProcessFailureKind, RunId, RunOutcome, RunRequest, RunSnapshot, RunState,
};
pub use session::{ChatContext, ConversationRef, Session, SessionBinding};
pub use worktree::{BranchName, Worktree, WorktreeKey};
