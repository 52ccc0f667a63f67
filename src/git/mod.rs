//! Git plumbing for project roots and worktrees

mod manager;

pub use manager::{find_git_root, GitManager, WorktreeEntry, WorktreeSource};
