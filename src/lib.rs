//! chatrelay - drive coding agents from chat
//!
//! chatrelay bridges a chat front end (or a terminal) to long-running coding agent
//! CLIs such as Claude Code or Codex. Each chat thread is bound to a project and a
//! branch; work for a branch runs in that branch's own git worktree, one run at a
//! time, and progress is streamed back while the agent works.
//!
//! ## Resuming anywhere
//!
//! Every finished run carries a resume token (`cr2_...`). Pasting the token into any
//! chat thread or terminal binds that context to the same project, branch and agent
//! conversation, so work can continue from another device.
//!
//! ## Layout
//!
//! - [`bridge`]: the facade tying everything together
//! - [`workspace`], [`git`]: projects and per-branch worktrees
//! - [`session`]: chat context to binding registry
//! - [`run`]: per-worktree queues and agent process supervision
//! - [`bus`]: per-run progress event fan-out
//! - [`agent`]: engine adapters (Claude, Codex, JSONL commands)
//! - [`resume`]: resume token codec
//! - [`transport`]: transport adapter interface, terminal output, run logs

pub mod agent;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod git;
pub mod resume;
pub mod run;
pub mod session;
pub mod state;
pub mod transport;
pub mod workspace;

pub use domain::*;
pub use error::{BridgeError, Result};
