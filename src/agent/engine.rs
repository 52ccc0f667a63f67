//! Agent engine trait

use std::path::Path;

use crate::domain::ProgressKind;

/// How to launch one engine process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,
}

/// One meaningful piece of an engine's stdout line
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    /// Progress to republish on the run's bus
    Event(ProgressKind),
    /// The engine announced the conversation id it is running in
    Conversation(String),
    /// Candidate final answer; the last one wins unless the result frame has one
    Answer(String),
    /// Engine-reported error text that does not end the run by itself
    Error(String),
    /// Final result frame
    Completed {
        ok: bool,
        answer: Option<String>,
        error: Option<String>,
    },
}

/// Error fragments engines print when asked to resume a conversation they no longer have
const EXPIRED_MARKERS: &[&str] = &[
    "no conversation found",
    "conversation not found",
    "session not found",
    "no session found",
    "unknown session",
    "thread not found",
    "no rollout found",
];

/// A coding agent CLI the bridge can drive
pub trait AgentEngine: Send + Sync {
    /// Stable engine id (lowercase)
    fn id(&self) -> &str;

    /// Command line for a run. `conversation` is the id to resume, if any.
    fn invocation(&self, conversation: Option<&str>, input: &str, worktree: &Path)
    -> EngineInvocation;

    /// Interpret one stdout line. Never fails: anything unrecognized becomes status
    /// text or is dropped.
    fn parse_line(&self, line: &str) -> Vec<EngineLine>;

    /// Check if this engine is available (binary exists)
    fn is_available(&self) -> bool;

    /// How to install the engine's CLI
    fn install_hint(&self) -> Option<&str>;

    /// Whether an error message means the resumed conversation is gone
    fn is_conversation_expired(&self, error: &str) -> bool {
        let lower = error.to_lowercase();
        EXPIRED_MARKERS.iter().any(|marker| lower.contains(marker))
    }
}

/// "install <engine>" message shown when an engine binary is missing
pub fn install_message(engine: &dyn AgentEngine) -> String {
    match engine.install_hint() {
        Some(hint) => format!("install {}: {}", engine.id(), hint),
        None => format!("install {}: make sure its CLI is on PATH", engine.id()),
    }
}

/// True if `program` is an existing path or resolves on PATH
pub fn binary_available(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    std::process::Command::new("which")
        .arg(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Lines that are not JSON objects are surfaced as plain status text
pub(super) fn plain_text(line: &str) -> Vec<EngineLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![EngineLine::Event(ProgressKind::status(trimmed))]
    }
}

/// First line of a possibly multi-line text, for status events
pub(super) fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}
