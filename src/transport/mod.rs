//! Transport adapters
//!
//! A transport carries user requests in and progress out. The core never formats chat
//! messages itself; it hands [`ProgressEvent`]s and file paths to a [`Transport`] and
//! lets the adapter decide how they look.

mod inbound;
mod log;
mod terminal;

use std::path::Path;

use async_trait::async_trait;

pub use inbound::{Attachment, InboundRequest, sanitize_file_name};
pub use log::LogSink;
pub use terminal::TerminalTransport;

use crate::domain::{ChatContext, ProgressEvent};
use crate::error::Result;

/// Outbound side of a chat front end or terminal
#[async_trait]
pub trait Transport: Send + Sync {
    /// Show one progress event in `context`
    async fn deliver(&self, context: &ChatContext, event: &ProgressEvent) -> Result<()>;

    /// Send a file from the worktree to `context`
    async fn send_file(&self, context: &ChatContext, path: &Path) -> Result<()>;
}
