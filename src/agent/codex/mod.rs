//! Codex CLI engine

mod parser;

use std::collections::BTreeMap;
use std::path::Path;

use super::engine::{AgentEngine, EngineInvocation, EngineLine, binary_available};
use crate::config::EngineSettings;
use parser::parse_codex_line;

const DEFAULT_BINARY: &str = "codex";
const DEFAULT_INSTALL_HINT: &str = "npm install -g @openai/codex";

/// Codex CLI engine
///
/// Runs `codex exec --json` non-interactively, resuming with `exec resume <thread>`.
/// The prompt is fed on stdin (`-`) so it never has to survive argument parsing.
#[derive(Debug)]
pub struct CodexEngine {
    id: String,
    binary: String,
    extra_args: Vec<String>,
    env: BTreeMap<String, String>,
    install_hint: String,
}

impl CodexEngine {
    pub fn new() -> Self {
        Self::with_settings("codex", &EngineSettings::default())
    }

    pub fn with_settings(id: &str, settings: &EngineSettings) -> Self {
        Self {
            id: id.to_ascii_lowercase(),
            binary: settings
                .binary
                .clone()
                .unwrap_or_else(|| DEFAULT_BINARY.to_string()),
            extra_args: settings.args.clone(),
            env: settings.env.clone(),
            install_hint: settings
                .install_hint
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTALL_HINT.to_string()),
        }
    }

    fn build_args(&self, conversation: Option<&str>) -> Vec<String> {
        // Global flags (e.g. --ask-for-approval) must come before `exec`
        let mut args: Vec<String> = self.extra_args.clone();

        args.push("exec".to_string());
        args.push("--json".to_string());
        args.push("--skip-git-repo-check".to_string());

        if let Some(thread_id) = conversation {
            args.push("resume".to_string());
            args.push(thread_id.to_string());
        }

        args.push("-".to_string());
        args
    }
}

impl Default for CodexEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentEngine for CodexEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn invocation(
        &self,
        conversation: Option<&str>,
        input: &str,
        _worktree: &Path,
    ) -> EngineInvocation {
        EngineInvocation {
            program: self.binary.clone(),
            args: self.build_args(conversation),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            stdin: Some(input.to_string()),
        }
    }

    fn parse_line(&self, line: &str) -> Vec<EngineLine> {
        parse_codex_line(line)
    }

    fn is_available(&self) -> bool {
        binary_available(&self.binary)
    }

    fn install_hint(&self) -> Option<&str> {
        Some(&self.install_hint)
    }
}
