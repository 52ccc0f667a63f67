//! Worktree commands

use anyhow::{Context, Result};
use clap::Subcommand;

use chatrelay::bridge::Bridge;
use chatrelay::config::Config;

use super::format_time;

#[derive(Subcommand)]
pub enum WorktreeCommand {
    /// Create (or find) the worktree for a branch and print its path
    Ensure { project: String, branch: String },

    /// List a project's worktrees
    List { project: String },

    /// Remove a branch worktree (the branch itself is kept)
    Remove { project: String, branch: String },
}

pub async fn worktree_command(config: Config, command: WorktreeCommand) -> Result<()> {
    let bridge = Bridge::open(config)?;

    match command {
        WorktreeCommand::Ensure { project, branch } => {
            let path = bridge
                .ensure_worktree(&project, &branch)
                .await
                .with_context(|| format!("Failed to prepare worktree for {}@{}", project, branch))?;
            println!("{}", path.display());
        }
        WorktreeCommand::List { project } => {
            let worktrees = bridge.list_worktrees(&project)?;
            if worktrees.is_empty() {
                println!("No worktrees for {}.", project);
                return Ok(());
            }
            for worktree in &worktrees {
                println!(
                    "{:<30} {:<17} {}",
                    worktree.branch.as_str(),
                    format_time(&worktree.created_at),
                    worktree.path.display()
                );
            }
        }
        WorktreeCommand::Remove { project, branch } => {
            bridge
                .remove_worktree(&project, &branch)
                .await
                .with_context(|| format!("Failed to remove worktree {}@{}", project, branch))?;
            println!("Removed worktree {}@{}", project, branch);
        }
    }
    Ok(())
}
