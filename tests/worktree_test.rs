//! Worktree lifecycle against real git repositories

mod common;

use std::process::Command;

use futures::future::join_all;
use tempfile::TempDir;

use chatrelay::BridgeError;
use chatrelay::bridge::Bridge;
use chatrelay::config::Config;

fn open(state: &TempDir, repo: &TempDir) -> Bridge {
    let bridge = Bridge::open(Config::default().with_state_dir(state.path())).unwrap();
    bridge.register_project("demo", repo.path(), None).unwrap();
    bridge
}

fn current_branch(repo: &std::path::Path) -> String {
    let output = Command::new("git")
        .args(["symbolic-ref", "--short", "HEAD"])
        .current_dir(repo)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[tokio::test]
async fn concurrent_ensures_share_one_worktree() {
    let state = TempDir::new().unwrap();
    let repo = common::create_test_repo();
    let bridge = open(&state, &repo);

    let paths = join_all((0..4).map(|_| bridge.ensure_worktree("demo", "feature/login"))).await;
    let paths: Vec<_> = paths.into_iter().map(Result::unwrap).collect();

    assert!(paths.iter().all(|p| p == &paths[0]));
    assert!(paths[0].ends_with(".worktrees/feature/login"));
    assert!(paths[0].join("test.txt").exists());
    assert_eq!(current_branch(&paths[0]), "feature/login");

    let listed = bridge.list_worktrees("demo").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].branch.as_str(), "feature/login");
}

#[tokio::test]
async fn checked_out_branch_maps_to_the_project_root() {
    let state = TempDir::new().unwrap();
    let repo = common::create_test_repo();
    let bridge = open(&state, &repo);

    let head = current_branch(repo.path());
    let path = bridge.ensure_worktree("demo", &head).await.unwrap();

    assert_eq!(path, repo.path().canonicalize().unwrap());
    assert!(bridge.list_worktrees("demo").unwrap().is_empty());
}

#[tokio::test]
async fn inventory_survives_a_restart() {
    let state = TempDir::new().unwrap();
    let repo = common::create_test_repo();

    let path = {
        let bridge = open(&state, &repo);
        bridge.ensure_worktree("demo", "persisted").await.unwrap()
    };

    let bridge = Bridge::open(Config::default().with_state_dir(state.path())).unwrap();
    let listed = bridge.list_worktrees("demo").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, path);
    assert_eq!(bridge.ensure_worktree("demo", "persisted").await.unwrap(), path);
}

#[tokio::test]
async fn removed_worktree_keeps_its_branch() {
    let state = TempDir::new().unwrap();
    let repo = common::create_test_repo();
    let bridge = open(&state, &repo);

    let path = bridge.ensure_worktree("demo", "cleanup").await.unwrap();
    bridge.remove_worktree("demo", "cleanup").await.unwrap();

    assert!(!path.exists());
    let branches = Command::new("git")
        .args(["branch", "--list", "cleanup"])
        .current_dir(repo.path())
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&branches.stdout).contains("cleanup"));

    assert!(matches!(
        bridge.remove_worktree("demo", "cleanup").await,
        Err(BridgeError::NotFound { .. })
    ));
}

#[tokio::test]
async fn foreign_directory_is_not_adopted() {
    let state = TempDir::new().unwrap();
    let repo = common::create_test_repo();
    let bridge = open(&state, &repo);

    std::fs::create_dir_all(repo.path().join(".worktrees/squatter")).unwrap();
    assert!(matches!(
        bridge.ensure_worktree("demo", "squatter").await,
        Err(BridgeError::WorktreeConflict { .. })
    ));
}

#[tokio::test]
async fn invalid_branch_names_are_rejected() {
    let state = TempDir::new().unwrap();
    let repo = common::create_test_repo();
    let bridge = open(&state, &repo);

    for bad in ["../escape", "with space", "trailing/", ""] {
        assert!(
            bridge.ensure_worktree("demo", bad).await.is_err(),
            "{:?} should be rejected",
            bad
        );
    }
}

#[tokio::test]
async fn failed_inventory_write_changes_nothing() {
    let state = TempDir::new().unwrap();
    let repo = common::create_test_repo();
    let bridge = open(&state, &repo);
    bridge.ensure_worktree("demo", "kept").await.unwrap();

    // A directory in place of the file makes every save fail
    let file = state.path().join("worktrees.json");
    std::fs::remove_file(&file).unwrap();
    std::fs::create_dir(&file).unwrap();

    assert!(bridge.ensure_worktree("demo", "later").await.is_err());
    assert!(bridge.remove_project("demo").is_err());
    let branches: Vec<String> = bridge
        .list_worktrees("demo")
        .unwrap()
        .iter()
        .map(|w| w.branch.as_str().to_string())
        .collect();
    assert_eq!(branches, vec!["kept"]);

    // The git worktree was created, so the retry adopts it
    std::fs::remove_dir(&file).unwrap();
    let later = bridge.ensure_worktree("demo", "later").await.unwrap();
    assert!(later.ends_with(".worktrees/later"));
    assert_eq!(bridge.list_worktrees("demo").unwrap().len(), 2);
}
