//! Init command implementation

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use chatrelay::bridge::Bridge;
use chatrelay::config::Config;
use chatrelay::git::find_git_root;

/// Register a repository as a project, writing a default config on first use
pub fn init_command(
    config: Config,
    config_path: Option<&Path>,
    name: &str,
    path: Option<PathBuf>,
    engine: Option<String>,
) -> Result<()> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::global_config_path);
    if Config::init_file(&config_path)? {
        info!("Created {}", config_path.display());
        println!("Created config at {}", config_path.display());
    }

    let root = match path {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            find_git_root(&cwd).with_context(|| {
                format!("{} is not inside a git repository", cwd.display())
            })?
        }
    };

    let bridge = Bridge::open(config)?;
    let project = bridge
        .register_project(name, &root, engine.as_deref())
        .with_context(|| format!("Failed to register project {}", name))?;

    println!(
        "Project {} -> {}{}",
        project.name,
        project.root.display(),
        project
            .default_engine
            .as_deref()
            .map(|e| format!(" (engine: {})", e))
            .unwrap_or_default()
    );
    Ok(())
}
