//! Session management CLI commands.

use anyhow::{Context, Result};
use clap::Subcommand;

use chatrelay::bridge::Bridge;
use chatrelay::config::Config;
use chatrelay::resume;
use chatrelay::session::SessionRegistry;
use chatrelay::{ChatContext, Session};

use super::format_time;

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Show a session and its resume token
    Show {
        /// Chat context, e.g. `chat:42:7` or `term:laptop`
        context: String,
    },

    /// Forget a session
    Unbind { context: String },
}

/// List stored sessions
pub fn list(config: &Config, json: bool) -> Result<()> {
    let sessions = SessionRegistry::open(&config.state_dir())?.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<24} {:<32} {:<10} {:<17}",
        "CONTEXT", "WORKTREE", "ENGINE", "LAST ACTIVE"
    );
    println!("{}", "-".repeat(86));
    for session in &sessions {
        println!(
            "{:<24} {:<32} {:<10} {:<17}",
            session.context.to_string(),
            session.binding.key().to_string(),
            session
                .binding
                .conversation
                .as_ref()
                .map(|c| c.engine.as_str())
                .unwrap_or("-"),
            format_time(&session.last_activity)
        );
    }
    Ok(())
}

pub fn session_command(config: &Config, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Show { context } => {
            let context = parse_context(&context)?;
            let session = SessionRegistry::open(&config.state_dir())?.resolve(&context)?;
            print_session(&session);
        }
        SessionCommand::Unbind { context } => {
            let context = parse_context(&context)?;
            let bridge = Bridge::open(config.clone())?;
            let session = bridge.sessions().unbind(&context)?;
            println!("Unbound {} (was {})", context, session.binding.key());
        }
    }
    Ok(())
}

fn parse_context(raw: &str) -> Result<ChatContext> {
    raw.parse()
        .with_context(|| format!("Invalid chat context {:?} (expected chat:<id>[:<thread>] or term:<name>)", raw))
}

fn print_session(session: &Session) {
    println!("Context:      {}", session.context);
    println!("Worktree:     {}", session.binding.key());
    match &session.binding.conversation {
        Some(conversation) => {
            println!("Engine:       {}", conversation.engine);
            println!("Conversation: {}", conversation.id);
        }
        None => println!("Conversation: (new on next run)"),
    }
    println!("Created:      {}", format_time(&session.created_at));
    println!("Last active:  {}", format_time(&session.last_activity));
    println!("Resume token: {}", resume::encode(&session.binding));
}
