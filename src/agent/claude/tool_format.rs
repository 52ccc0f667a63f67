//! Tool call formatting utilities for Claude engine

/// Format a tool call for display
pub fn format_tool_call(name: &str, input: &serde_json::Value) -> String {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str());

    match name {
        "Read" | "Write" | "Edit" | "MultiEdit" => match field("file_path") {
            Some(path) => format!("{} {}", name, path),
            None => format!("{} file", name),
        },
        "NotebookEdit" => match field("notebook_path") {
            Some(path) => format!("NotebookEdit {}", path),
            None => "NotebookEdit".to_string(),
        },
        "Bash" => match field("command") {
            Some(cmd) => format!("Bash: {}", cmd),
            None => "Bash command".to_string(),
        },
        "Glob" | "Grep" => match field("pattern") {
            Some(pattern) => format!("{}: {}", name, pattern),
            None => format!("{} search", name),
        },
        "WebFetch" => field("url")
            .map(|url| format!("WebFetch {}", url))
            .unwrap_or_else(|| name.to_string()),
        "Task" => field("description")
            .map(|d| format!("Task: {}", d))
            .unwrap_or_else(|| name.to_string()),
        _ => name.to_string(),
    }
}

/// Path a file-mutating tool call writes to, if any
pub fn written_path<'a>(name: &str, input: &'a serde_json::Value) -> Option<&'a str> {
    let key = match name {
        "Write" | "Edit" | "MultiEdit" => "file_path",
        "NotebookEdit" => "notebook_path",
        _ => return None,
    };
    input.get(key).and_then(|v| v.as_str())
}
