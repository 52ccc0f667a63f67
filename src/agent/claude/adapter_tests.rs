use super::*;
use std::path::PathBuf;

#[test]
fn invocation_resumes_and_ends_option_parsing() {
    let engine = ClaudeEngine::new();
    let inv = engine.invocation(Some("sess-1"), "--fix the bug", &PathBuf::from("/tmp"));

    assert_eq!(inv.program, "claude");
    let resume = inv.args.iter().position(|a| a == "--resume").unwrap();
    assert_eq!(inv.args[resume + 1], "sess-1");

    let n = inv.args.len();
    assert_eq!(inv.args[n - 2], "--");
    assert_eq!(inv.args[n - 1], "--fix the bug");
    assert!(inv.stdin.is_none());
}

#[test]
fn fresh_invocation_has_no_resume_flag() {
    let engine = ClaudeEngine::new();
    let inv = engine.invocation(None, "hello", &PathBuf::from("/tmp"));
    assert!(!inv.args.iter().any(|a| a == "--resume"));
}

#[test]
fn init_frame_yields_conversation() {
    let engine = ClaudeEngine::new();
    let lines =
        engine.parse_line(r#"{"type":"system","subtype":"init","session_id":"abc-123"}"#);
    assert_eq!(lines, vec![EngineLine::Conversation("abc-123".to_string())]);
}

#[test]
fn edit_tool_use_yields_tool_and_file_change() {
    let engine = ClaudeEngine::new();
    let line = r#"{"type":"assistant","message":{"content":[
        {"type":"text","text":"Fixing it now.\nDetails follow"},
        {"type":"tool_use","id":"t1","name":"Edit","input":{"file_path":"src/lib.rs"}}
    ]}}"#
        .replace('\n', "");
    let lines = engine.parse_line(&line);

    assert!(matches!(
        &lines[0],
        EngineLine::Event(ProgressKind::Status { text }) if text == "Fixing it now."
    ));
    assert!(matches!(&lines[1], EngineLine::Answer(_)));
    assert!(matches!(
        &lines[2],
        EngineLine::Event(ProgressKind::ToolInvocation { tool, summary, .. })
            if tool == "Edit" && summary == "Edit src/lib.rs"
    ));
    assert_eq!(
        lines[3],
        EngineLine::Event(ProgressKind::file("src/lib.rs", FileChangeKind::Modified))
    );
}

#[test]
fn result_frames_classify_success_and_failure() {
    let engine = ClaudeEngine::new();

    let ok = engine.parse_line(
        r#"{"type":"result","subtype":"success","result":"Done.","session_id":"s1"}"#,
    );
    assert_eq!(
        ok.last().unwrap(),
        &EngineLine::Completed {
            ok: true,
            answer: Some("Done.".to_string()),
            error: None
        }
    );

    let failed = engine.parse_line(
        r#"{"type":"result","subtype":"error_during_execution","is_error":true,"errors":["No conversation found with session ID: s1"]}"#,
    );
    let EngineLine::Completed { ok, error, .. } = failed.last().unwrap() else {
        panic!("expected a result frame");
    };
    assert!(!ok);
    assert!(engine.is_conversation_expired(error.as_deref().unwrap()));
}

#[test]
fn unknown_output_is_status_or_dropped() {
    let engine = ClaudeEngine::new();
    assert_eq!(
        engine.parse_line("warning: something odd"),
        vec![EngineLine::Event(ProgressKind::status("warning: something odd"))]
    );
    assert!(engine.parse_line(r#"{"type":"stream_event","event":{}}"#).is_empty());
    assert!(engine.parse_line("   ").is_empty());
}
