//! Engine configuration (`[engines.<id>]`)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which built-in engine implementation a config entry drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Claude,
    Codex,
    /// Any CLI speaking the chatrelay JSONL protocol
    Command,
}

/// Settings for one engine.
///
/// For `claude`/`codex` every field is an override of the built-in defaults. For
/// command engines `binary` is required and `args`/`resume_args` are templates in
/// which `{prompt}` and `{conversation}` are substituted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Defaults to the engine id when that names a built-in, else `command`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EngineKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Arguments used instead of `args` when resuming a conversation
    #[serde(default)]
    pub resume_args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Feed the prompt on stdin instead of the command line
    #[serde(default)]
    pub stdin: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
}

impl EngineSettings {
    /// Effective kind for an engine id
    pub fn kind_for(&self, id: &str) -> EngineKind {
        if let Some(kind) = self.kind {
            return kind;
        }
        match id.to_ascii_lowercase().as_str() {
            "claude" => EngineKind::Claude,
            "codex" => EngineKind::Codex,
            _ => EngineKind::Command,
        }
    }
}
