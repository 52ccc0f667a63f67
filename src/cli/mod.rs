//! CLI command implementations

pub mod engines;
pub mod init;
pub mod project;
pub mod run;
pub mod session;
pub mod token;
pub mod worktree;

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};

use chatrelay::config::Config;

/// Load the config file and apply command line overrides
pub fn load_config(path: Option<&Path>, state_dir: Option<PathBuf>) -> Result<Config> {
    let config = Config::load(path)?;
    Ok(match state_dir {
        Some(dir) => config.with_state_dir(dir),
        None => config,
    })
}

pub(crate) fn format_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
