//! Configurable command engines
//!
//! Any CLI can be plugged in as an engine if it prints one JSON object per line:
//!
//! ```text
//! {"type":"conversation","id":"..."}
//! {"type":"status","text":"..."}
//! {"type":"tool","tool":"bash","summary":"cargo test"}
//! {"type":"file","path":"src/lib.rs","change":"modified"}
//! {"type":"answer","text":"..."}
//! {"type":"error","message":"..."}
//! {"type":"result","ok":true,"answer":"...","error":null}
//! ```
//!
//! Lines that are not JSON are shown as status text.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::engine::{AgentEngine, EngineInvocation, EngineLine, binary_available, plain_text};
use crate::config::EngineSettings;
use crate::domain::{FileChangeKind, ProgressKind};
use crate::error::{BridgeError, Result};

const PROMPT_PLACEHOLDER: &str = "{prompt}";
const CONVERSATION_PLACEHOLDER: &str = "{conversation}";

/// Set for the child when resuming, so wrapper scripts need no argument parsing
pub const CONVERSATION_ENV: &str = "CHATRELAY_CONVERSATION";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Conversation {
        id: String,
    },
    Status {
        text: String,
    },
    Tool {
        tool: String,
        #[serde(default)]
        summary: String,
        #[serde(default)]
        args: Option<serde_json::Value>,
    },
    File {
        path: String,
        change: FileChangeKind,
    },
    Answer {
        text: String,
    },
    Error {
        message: String,
    },
    Result {
        ok: bool,
        #[serde(default)]
        answer: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug)]
pub struct CommandEngine {
    id: String,
    program: String,
    args: Vec<String>,
    resume_args: Vec<String>,
    env: BTreeMap<String, String>,
    stdin: bool,
    install_hint: Option<String>,
}

impl CommandEngine {
    pub fn from_settings(id: &str, settings: &EngineSettings) -> Result<Self> {
        let program = settings.binary.clone().ok_or(BridgeError::InvalidEngine {
            id: id.to_string(),
            reason: "command engines need a binary",
        })?;

        Ok(Self {
            id: id.to_ascii_lowercase(),
            program,
            args: settings.args.clone(),
            resume_args: settings.resume_args.clone(),
            env: settings.env.clone(),
            stdin: settings.stdin,
            install_hint: settings.install_hint.clone(),
        })
    }

    fn expand(&self, templates: &[String], conversation: Option<&str>, prompt: &str) -> Vec<String> {
        let prompt_arg = if self.stdin { "" } else { prompt };
        templates
            .iter()
            .map(|t| {
                t.replace(CONVERSATION_PLACEHOLDER, conversation.unwrap_or(""))
                    .replace(PROMPT_PLACEHOLDER, prompt_arg)
            })
            .collect()
    }
}

impl AgentEngine for CommandEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn invocation(
        &self,
        conversation: Option<&str>,
        input: &str,
        _worktree: &Path,
    ) -> EngineInvocation {
        let templates = match conversation {
            Some(_) if !self.resume_args.is_empty() => &self.resume_args,
            _ => &self.args,
        };

        let mut env: Vec<(String, String)> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(id) = conversation {
            env.push((CONVERSATION_ENV.to_string(), id.to_string()));
        }

        EngineInvocation {
            program: self.program.clone(),
            args: self.expand(templates, conversation, input),
            env,
            stdin: self.stdin.then(|| input.to_string()),
        }
    }

    fn parse_line(&self, line: &str) -> Vec<EngineLine> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return plain_text(line);
        }
        let Ok(frame) = serde_json::from_str::<Frame>(trimmed) else {
            return plain_text(line);
        };

        let parsed = match frame {
            Frame::Conversation { id } => EngineLine::Conversation(id),
            Frame::Status { text } => EngineLine::Event(ProgressKind::status(text)),
            Frame::Tool {
                tool,
                summary,
                args,
            } => EngineLine::Event(ProgressKind::ToolInvocation {
                tool,
                summary,
                args,
            }),
            Frame::File { path, change } => EngineLine::Event(ProgressKind::file(path, change)),
            Frame::Answer { text } => EngineLine::Answer(text),
            Frame::Error { message } => EngineLine::Error(message),
            Frame::Result { ok, answer, error } => EngineLine::Completed { ok, answer, error },
        };
        vec![parsed]
    }

    fn is_available(&self) -> bool {
        binary_available(&self.program)
    }

    fn install_hint(&self) -> Option<&str> {
        self.install_hint.as_deref()
    }
}
