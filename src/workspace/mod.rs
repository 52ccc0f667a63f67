//! Projects and their per-branch worktrees
//!
//! The workspace module provides:
//! - ProjectRegistry: explicit, persisted registration of repositories
//! - WorktreeManager: one git worktree per (project, branch) key, created on demand

mod registry;
mod worktrees;

pub use registry::ProjectRegistry;
pub use worktrees::{KeyGuard, KeyOccupancy, ResolvedWorktree, WorktreeManager};
