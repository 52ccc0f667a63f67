//! Configuration loading and management

mod agent;
mod io;
mod settings;

pub use agent::{EngineKind, EngineSettings};
pub use settings::{BusSettings, SupervisorSettings, WorktreeSettings};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure (`~/.chatrelay/config.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where projects, sessions, the worktree inventory and the run journal live.
    /// Defaults to the config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Engine used when neither the request, the session nor the project picks one
    #[serde(default = "default_engine")]
    pub default_engine: String,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub worktrees: WorktreeSettings,

    /// Engine overrides and custom command engines, keyed by engine id
    #[serde(default)]
    pub engines: BTreeMap<String, EngineSettings>,
}

fn default_engine() -> String {
    "claude".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: None,
            default_engine: default_engine(),
            supervisor: SupervisorSettings::default(),
            bus: BusSettings::default(),
            worktrees: WorktreeSettings::default(),
            engines: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Resolved state directory
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(Self::global_config_dir)
    }

    /// Config with a state directory override, e.g. for tests
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.default_engine, "claude");
        assert_eq!(config.bus.capacity, 1024);
        assert_eq!(config.worktrees.dir, PathBuf::from(".worktrees"));
        assert_eq!(
            config.supervisor.inactivity_timeout(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn parses_engine_sections() {
        let config: Config = toml::from_str(
            r#"
            default_engine = "codex"
            state_dir = "/var/lib/chatrelay"

            [supervisor]
            inactivity_timeout_secs = 30
            grace_period_ms = 250

            [engines.claude]
            args = ["--model", "opus"]

            [engines.echo]
            kind = "command"
            binary = "/usr/local/bin/echo-agent"
            args = ["--prompt", "{prompt}"]
            resume_args = ["--resume", "{conversation}", "--prompt", "{prompt}"]
            stdin = false
            install_hint = "cargo install echo-agent"

            [engines.echo.env]
            ECHO_MODE = "jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_engine, "codex");
        assert_eq!(config.state_dir(), PathBuf::from("/var/lib/chatrelay"));
        assert_eq!(config.supervisor.grace_period(), Duration::from_millis(250));
        assert_eq!(config.supervisor.tick_interval(), Duration::from_secs(15));

        let echo = &config.engines["echo"];
        assert_eq!(echo.kind, Some(EngineKind::Command));
        assert_eq!(echo.env.get("ECHO_MODE").map(String::as_str), Some("jsonl"));
        assert_eq!(config.engines["claude"].args, vec!["--model", "opus"]);
    }
}
