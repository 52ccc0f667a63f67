//! Codex CLI JSON output parser
//!
//! `codex exec --json` emits one JSON object per line:
//! - `thread.started` - carries the thread id used to resume
//! - `item.started` / `item.completed` - individual steps
//! - `turn.completed` / `turn.failed` - the turn finished
//! - `error` - errors, possibly transient

use serde_json::Value;

use crate::agent::engine::{EngineLine, first_line, plain_text};
use crate::domain::{FileChangeKind, ProgressKind};

pub fn parse_codex_line(line: &str) -> Vec<EngineLine> {
    let json: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return plain_text(line),
    };

    let event_type = match json.get("type").and_then(|t| t.as_str()) {
        Some(t) => t,
        None => return Vec::new(),
    };

    match event_type {
        "thread.started" => json
            .get("thread_id")
            .and_then(|t| t.as_str())
            .map(|id| vec![EngineLine::Conversation(id.to_string())])
            .unwrap_or_default(),

        "item.started" | "item.completed" => parse_item_event(&json, event_type),

        "turn.completed" => vec![EngineLine::Completed {
            ok: true,
            answer: None,
            error: None,
        }],

        "turn.failed" => {
            let message = json
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("turn failed");
            vec![EngineLine::Completed {
                ok: false,
                answer: None,
                error: Some(message.to_string()),
            }]
        }

        "error" => {
            let message = json
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            vec![
                EngineLine::Event(ProgressKind::status(format!("error: {}", message))),
                EngineLine::Error(message.to_string()),
            ]
        }

        _ => Vec::new(),
    }
}

fn parse_item_event(json: &Value, event_type: &str) -> Vec<EngineLine> {
    let Some(item) = json.get("item") else {
        return Vec::new();
    };
    let item_type = item
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("unknown");
    let completed = event_type == "item.completed";
    let text = || item.get("text").and_then(|t| t.as_str()).unwrap_or("");

    match item_type {
        "reasoning" if completed => {
            let summary = first_line(text());
            if summary.is_empty() {
                Vec::new()
            } else {
                vec![EngineLine::Event(ProgressKind::status(summary))]
            }
        }
        "command_execution" if !completed => {
            let cmd = item.get("command").and_then(|c| c.as_str()).unwrap_or("");
            vec![EngineLine::Event(ProgressKind::tool("bash", cmd))]
        }
        "agent_message" if completed => {
            let text = text();
            vec![
                EngineLine::Event(ProgressKind::status(first_line(text))),
                EngineLine::Answer(text.to_string()),
            ]
        }
        "file_change" if completed => item
            .get("changes")
            .and_then(|c| c.as_array())
            .map(|changes| {
                changes
                    .iter()
                    .filter_map(|change| {
                        let path = change.get("path")?.as_str()?;
                        let kind = match change.get("kind").and_then(|k| k.as_str()) {
                            Some("add") => FileChangeKind::Added,
                            Some("delete") => FileChangeKind::Deleted,
                            _ => FileChangeKind::Modified,
                        };
                        Some(EngineLine::Event(ProgressKind::file(path, kind)))
                    })
                    .collect()
            })
            .unwrap_or_default(),
        "mcp_tool_call" if !completed => {
            let tool = item.get("tool").and_then(|t| t.as_str()).unwrap_or("mcp");
            let server = item.get("server").and_then(|s| s.as_str()).unwrap_or("");
            vec![EngineLine::Event(ProgressKind::tool(tool, server))]
        }
        "web_search" if !completed => {
            let query = item.get("query").and_then(|q| q.as_str()).unwrap_or("");
            vec![EngineLine::Event(ProgressKind::tool("web_search", query))]
        }
        "error" => vec![EngineLine::Error(text().to_string())],
        _ => Vec::new(),
    }
}
