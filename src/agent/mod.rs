//! Agent engines.
//!
//! An engine knows how to launch one coding agent CLI and how to read its output.
//! It never owns the process: the run supervisor spawns the [`EngineInvocation`],
//! feeds each stdout line to [`AgentEngine::parse_line`] and republishes the result
//! on the run's event bus.
//!
//! - **[`AgentEngine`]** - The trait every engine implements
//! - **Engines**:
//!   - [`ClaudeEngine`] - Claude Code via `claude --print --output-format stream-json`
//!   - [`CodexEngine`] - OpenAI Codex via `codex exec --json`
//!   - [`CommandEngine`] - any CLI speaking the chatrelay JSONL protocol
//! - **[`EngineRegistry`]** - case-insensitive lookup by id, built from config

mod claude;
mod codex;
mod command;
mod engine;
mod registry;

pub use claude::{ClaudeEngine, StreamEvent};
pub use codex::CodexEngine;
pub use command::{CONVERSATION_ENV, CommandEngine};
pub use engine::{AgentEngine, EngineInvocation, EngineLine, binary_available, install_message};
pub use registry::{EngineRegistry, RESERVED_ENGINE_IDS, is_reserved};
