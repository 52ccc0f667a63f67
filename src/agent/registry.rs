//! Engine registry
//!
//! Engines are looked up by id, case-insensitively. Ids that collide with chat
//! commands are reserved and can never name an engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::claude::ClaudeEngine;
use super::codex::CodexEngine;
use super::command::CommandEngine;
use super::engine::AgentEngine;
use crate::config::{EngineKind, EngineSettings};
use crate::error::{BridgeError, Result};

/// Ids that collide with chat directives
pub const RESERVED_ENGINE_IDS: &[&str] = &[
    "cancel", "help", "new", "resume", "status", "stop", "project", "branch", "session",
    "engines", "file",
];

pub fn is_reserved(id: &str) -> bool {
    let id = id.to_ascii_lowercase();
    RESERVED_ENGINE_IDS.contains(&id.as_str())
}

#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn AgentEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `claude` and `codex` engines
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .engines
            .insert("claude".to_string(), Arc::new(ClaudeEngine::new()));
        registry
            .engines
            .insert("codex".to_string(), Arc::new(CodexEngine::new()));
        registry
    }

    /// Built-ins plus the `[engines.<id>]` config sections.
    ///
    /// A section named after a built-in overrides that built-in.
    pub fn from_settings(settings: &BTreeMap<String, EngineSettings>) -> Result<Self> {
        let mut registry = Self::with_defaults();
        let mut configured: Vec<String> = Vec::new();

        for (id, engine_settings) in settings {
            let key = id.to_ascii_lowercase();
            if configured.contains(&key) {
                return Err(BridgeError::InvalidEngine {
                    id: id.clone(),
                    reason: "configured twice (ids are case-insensitive)",
                });
            }
            configured.push(key.clone());

            let engine: Arc<dyn AgentEngine> = match engine_settings.kind_for(id) {
                EngineKind::Claude => Arc::new(ClaudeEngine::with_settings(id, engine_settings)),
                EngineKind::Codex => Arc::new(CodexEngine::with_settings(id, engine_settings)),
                EngineKind::Command => Arc::new(CommandEngine::from_settings(id, engine_settings)?),
            };

            registry.engines.remove(&key);
            registry.register(engine)?;
        }

        Ok(registry)
    }

    /// Add an engine. Reserved and already-registered ids are rejected.
    pub fn register(&mut self, engine: Arc<dyn AgentEngine>) -> Result<()> {
        let id = engine.id().to_ascii_lowercase();
        if id.is_empty() {
            return Err(BridgeError::InvalidEngine {
                id,
                reason: "id cannot be empty",
            });
        }
        if is_reserved(&id) {
            return Err(BridgeError::InvalidEngine {
                id,
                reason: "id is reserved",
            });
        }
        if self.engines.contains_key(&id) {
            return Err(BridgeError::InvalidEngine {
                id,
                reason: "already registered",
            });
        }
        self.engines.insert(id, engine);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn AgentEngine>> {
        let key = id.to_ascii_lowercase();
        if is_reserved(&key) {
            return Err(BridgeError::InvalidEngine {
                id: id.to_string(),
                reason: "id is reserved",
            });
        }
        self.engines
            .get(&key)
            .cloned()
            .ok_or_else(|| BridgeError::not_found("engine", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.engines.contains_key(&id.to_ascii_lowercase())
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    pub fn engines(&self) -> impl Iterator<Item = &Arc<dyn AgentEngine>> {
        self.engines.values()
    }
}
