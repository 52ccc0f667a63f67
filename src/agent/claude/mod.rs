//! Claude Code engine
//!
//! This module contains the Claude Code CLI engine and its stream-json output types.

mod adapter;
mod output;
mod tool_format;

pub use adapter::ClaudeEngine;
pub use output::StreamEvent;
