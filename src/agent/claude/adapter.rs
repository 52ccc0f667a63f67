//! Claude Code engine

use std::collections::BTreeMap;
use std::path::Path;

use super::output::{ContentBlock, StreamEvent, tool_result_text};
use super::tool_format::{format_tool_call, written_path};
use crate::agent::engine::{
    AgentEngine, EngineInvocation, EngineLine, binary_available, first_line, plain_text,
};
use crate::config::EngineSettings;
use crate::domain::{FileChangeKind, ProgressKind};

const DEFAULT_BINARY: &str = "claude";
const DEFAULT_INSTALL_HINT: &str = "npm install -g @anthropic-ai/claude-code";

/// Drives `claude --print --output-format stream-json`
#[derive(Debug)]
pub struct ClaudeEngine {
    id: String,
    binary: String,
    extra_args: Vec<String>,
    env: BTreeMap<String, String>,
    install_hint: String,
}

impl ClaudeEngine {
    pub fn new() -> Self {
        Self::with_settings("claude", &EngineSettings::default())
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

    fn build_args(&self, conversation: Option<&str>, prompt: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if let Some(session_id) = conversation {
            args.push("--resume".to_string());
            args.push(session_id.to_string());
        }

        args.extend(self.extra_args.iter().cloned());

        // Variadic options (--allowedTools, --add-dir) would otherwise swallow the prompt
        args.push("--".to_string());
        args.push(prompt.to_string());

        args
    }
}

impl Default for ClaudeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentEngine for ClaudeEngine {
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
            args: self.build_args(conversation, input),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            stdin: None,
        }
    }

    fn parse_line(&self, line: &str) -> Vec<EngineLine> {
        let Some(event) = StreamEvent::parse(line) else {
            // Valid JSON of an unknown shape (stream_event, rate limit notices) is noise
            if serde_json::from_str::<serde_json::Value>(line).is_ok() {
                return Vec::new();
            }
            return plain_text(line);
        };

        let mut out = Vec::new();
        match event {
            StreamEvent::System {
                subtype,
                message,
                session_id,
            } => {
                if let Some(id) = session_id.filter(|id| !id.is_empty()) {
                    out.push(EngineLine::Conversation(id));
                }
                if let Some(message) = message {
                    out.push(EngineLine::Event(ProgressKind::status(format!(
                        "{}: {}",
                        subtype, message
                    ))));
                }
            }
            StreamEvent::Assistant { message } => {
                for block in message.content {
                    match block {
                        ContentBlock::Text { text } => {
                            let summary = first_line(&text);
                            if !summary.is_empty() {
                                out.push(EngineLine::Event(ProgressKind::status(summary)));
                            }
                            out.push(EngineLine::Answer(text));
                        }
                        ContentBlock::ToolUse { name, input, .. } => {
                            let summary = format_tool_call(&name, &input);
                            let written = written_path(&name, &input).map(str::to_string);
                            out.push(EngineLine::Event(ProgressKind::ToolInvocation {
                                tool: name.clone(),
                                summary,
                                args: Some(input),
                            }));
                            if let Some(path) = written {
                                let change = if name == "Write" {
                                    FileChangeKind::Added
                                } else {
                                    FileChangeKind::Modified
                                };
                                out.push(EngineLine::Event(ProgressKind::file(path, change)));
                            }
                        }
                        _ => {}
                    }
                }
            }
            StreamEvent::User { message } => {
                for block in message.content {
                    if let ContentBlock::ToolResult {
                        content,
                        is_error: true,
                        ..
                    } = block
                    {
                        let text = tool_result_text(&content);
                        out.push(EngineLine::Event(ProgressKind::status(format!(
                            "tool error: {}",
                            first_line(&text)
                        ))));
                    }
                }
            }
            StreamEvent::Result {
                subtype,
                result,
                is_error,
                session_id,
                errors,
            } => {
                if let Some(id) = session_id.filter(|id| !id.is_empty()) {
                    out.push(EngineLine::Conversation(id));
                }
                let ok = subtype == "success" && !is_error;
                let error = if ok {
                    None
                } else {
                    let listed: Vec<&str> = errors
                        .as_array()
                        .map(|a| a.iter().filter_map(|e| e.as_str()).collect())
                        .unwrap_or_default();
                    Some(if !listed.is_empty() {
                        listed.join("; ")
                    } else {
                        result.clone().unwrap_or_else(|| subtype.clone())
                    })
                };
                out.push(EngineLine::Completed {
                    ok,
                    answer: if ok { result } else { None },
                    error,
                });
            }
        }
        out
    }

    fn is_available(&self) -> bool {
        binary_available(&self.binary)
    }

    fn install_hint(&self) -> Option<&str> {
        Some(&self.install_hint)
    }
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
