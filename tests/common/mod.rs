//! Shared fixtures for integration tests

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn git(repo: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {:?}: {}", args, e));
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// A temporary repository with one commit, ready for worktrees
pub fn create_test_repo() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo = temp_dir.path();

    git(repo, &["init"]);
    git(repo, &["config", "user.email", "test@test.com"]);
    git(repo, &["config", "user.name", "Test User"]);

    fs::write(repo.join("test.txt"), "initial content\n").expect("Failed to write initial file");
    git(repo, &["add", "."]);
    git(repo, &["commit", "-m", "Initial commit"]);

    temp_dir
}
