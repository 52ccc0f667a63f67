//! End-to-end bridge tests: chat request -> worktree -> agent process -> events
//!
//! The agent is a small shell script speaking the JSONL engine protocol, so these
//! tests need `sh` and `git` but no real coding agent.

mod common;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use chatrelay::bridge::{Bridge, Reply, Submission};
use chatrelay::config::{Config, EngineSettings};
use chatrelay::run::CancelOutcome;
use chatrelay::transport::{InboundRequest, Transport};
use chatrelay::{
    BridgeError, ChatContext, ConversationRef, ProgressEvent, ProgressKind, RunResult, RunState,
};

/// Announces a conversation (reusing the resumed one), reports its directory and
/// answers with the prompt. Prompts `block`, `fail` and `expire` misbehave.
const AGENT_SCRIPT: &str = r#"
conv="${CHATRELAY_CONVERSATION:-c-$(basename "$PWD")}"
printf '{"type":"conversation","id":"%s"}\n' "$conv"
printf '{"type":"status","text":"in %s"}\n' "$PWD"
case "$1" in
  block) sleep 30 ;;
  fail) echo boom >&2; exit 2 ;;
  expire) echo "Error: No conversation found with session ID $conv" >&2; exit 1 ;;
esac
printf '{"type":"result","ok":true,"answer":"%s via %s"}\n' "$1" "${CHATRELAY_CONVERSATION:-new}"
"#;

struct Fixture {
    _state: TempDir,
    repo: TempDir,
    bridge: Bridge,
}

fn config(state_dir: &std::path::Path) -> Config {
    let mut config = Config::default().with_state_dir(state_dir);
    config.default_engine = "script".to_string();
    config.supervisor.grace_period_ms = 200;
    config.engines.insert(
        "script".to_string(),
        EngineSettings {
            binary: Some("sh".to_string()),
            args: vec![
                "-c".to_string(),
                AGENT_SCRIPT.to_string(),
                "agent".to_string(),
                "{prompt}".to_string(),
            ],
            ..EngineSettings::default()
        },
    );
    config
}

fn fixture() -> Fixture {
    let state = TempDir::new().unwrap();
    let repo = common::create_test_repo();
    let bridge = Bridge::open(config(state.path())).unwrap();
    bridge.register_project("demo", repo.path(), None).unwrap();
    Fixture {
        _state: state,
        repo,
        bridge,
    }
}

#[derive(Default)]
struct Recording {
    events: Mutex<Vec<ProgressEvent>>,
}

#[async_trait]
impl Transport for Recording {
    async fn deliver(&self, _context: &ChatContext, event: &ProgressEvent) -> chatrelay::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn send_file(&self, _context: &ChatContext, _path: &std::path::Path) -> chatrelay::Result<()> {
        Ok(())
    }
}

impl Recording {
    fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match &e.kind {
                ProgressKind::Status { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

async fn submit(bridge: &Bridge, request: InboundRequest) -> Submission {
    match bridge.handle(request).await.unwrap() {
        Reply::Submitted(submission) => submission,
        Reply::Bound(session) => panic!("expected a run, got binding {:?}", session),
    }
}

/// Deliver the run to completion and wait until its conversation is recorded
async fn finish(submission: Submission, context: &ChatContext, transport: &Recording) -> RunResult {
    let Submission {
        mut events,
        recorder,
        ..
    } = submission;
    let result = tokio::time::timeout(
        Duration::from_secs(20),
        Bridge::pump(&mut events, context, transport),
    )
    .await
    .expect("run should finish")
    .expect("run should end with a result");
    recorder.await.unwrap();
    result
}

#[tokio::test]
async fn run_executes_in_branch_worktree_and_records_conversation() {
    let fx = fixture();
    let context = ChatContext::terminal("dev");
    let transport = Recording::default();

    let submission = submit(
        &fx.bridge,
        InboundRequest::new(context.clone(), "hello").with_branch("feature"),
    )
    .await;
    let worktree = submission.worktree.clone();
    assert_eq!(worktree, fx.repo.path().canonicalize().unwrap().join(".worktrees/feature"));
    assert_eq!(submission.engine, "script");
    assert_eq!(submission.handle.waiting_ahead, 0);

    let run_id = submission.handle.run_id;
    let result = finish(submission, &context, &transport).await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.answer.as_deref(), Some("hello via new"));
    assert!(
        transport
            .statuses()
            .contains(&format!("in {}", worktree.display()))
    );

    let session = fx.bridge.sessions().resolve(&context).unwrap();
    assert_eq!(
        session.binding.conversation,
        Some(ConversationRef::new("script", "c-feature"))
    );

    let logged = fx.bridge.log().replay(run_id).unwrap();
    assert!(logged.last().unwrap().is_terminal());
    assert_eq!(logged.len(), transport.events.lock().unwrap().len());
}

#[tokio::test]
async fn follow_up_resumes_the_recorded_conversation() {
    let fx = fixture();
    let context = ChatContext::terminal("dev");
    let transport = Recording::default();

    let first = submit(&fx.bridge, InboundRequest::new(context.clone(), "first")).await;
    finish(first, &context, &transport).await;

    let second = submit(&fx.bridge, InboundRequest::new(context.clone(), "second")).await;
    let result = finish(second, &context, &transport).await;

    let root_name = fx
        .repo
        .path()
        .canonicalize()
        .unwrap()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert_eq!(
        result.answer.as_deref(),
        Some(format!("second via c-{}", root_name).as_str())
    );
}

#[tokio::test]
async fn resume_token_moves_a_conversation_to_another_chat() {
    let fx = fixture();
    let terminal = ChatContext::terminal("dev");
    let chat = ChatContext::chat(42, Some(7));
    let transport = Recording::default();

    let run = submit(
        &fx.bridge,
        InboundRequest::new(terminal.clone(), "hello").with_branch("feature"),
    )
    .await;
    let token = finish(run, &terminal, &transport)
        .await
        .resume_token
        .expect("completed runs carry a resume token");

    // A bare token only binds
    let Reply::Bound(session) = fx
        .bridge
        .handle(InboundRequest::new(chat.clone(), token.clone()))
        .await
        .unwrap()
    else {
        panic!("a bare token should not start a run");
    };
    let original = fx.bridge.sessions().resolve(&terminal).unwrap();
    assert_eq!(session.binding, original.binding);

    let run = submit(&fx.bridge, InboundRequest::new(chat.clone(), "again")).await;
    assert_eq!(run.session.binding.key(), original.binding.key());
    let result = finish(run, &chat, &transport).await;
    assert_eq!(result.answer.as_deref(), Some("again via c-feature"));
}

#[tokio::test]
async fn switching_branch_starts_a_fresh_conversation() {
    let fx = fixture();
    let context = ChatContext::terminal("dev");
    let transport = Recording::default();

    let run = submit(
        &fx.bridge,
        InboundRequest::new(context.clone(), "one").with_branch("feature"),
    )
    .await;
    finish(run, &context, &transport).await;

    let run = submit(
        &fx.bridge,
        InboundRequest::new(context.clone(), "two").with_branch("other"),
    )
    .await;
    assert_eq!(run.session.binding.conversation, None);
    let result = finish(run, &context, &transport).await;
    assert_eq!(result.answer.as_deref(), Some("two via new"));
}

#[tokio::test]
async fn failed_run_reports_exit_and_keeps_conversation() {
    let fx = fixture();
    let context = ChatContext::terminal("dev");
    let transport = Recording::default();

    let run = submit(&fx.bridge, InboundRequest::new(context.clone(), "fail")).await;
    let result = finish(run, &context, &transport).await;

    assert!(matches!(result.state, RunState::Failed(_)));
    assert!(result.state.to_string().contains("boom"), "{}", result.state);
    let session = fx.bridge.sessions().resolve(&context).unwrap();
    assert!(session.binding.conversation.is_some());
}

#[tokio::test]
async fn expired_conversation_is_forgotten() {
    let fx = fixture();
    let context = ChatContext::terminal("dev");
    let transport = Recording::default();

    let run = submit(&fx.bridge, InboundRequest::new(context.clone(), "hello")).await;
    finish(run, &context, &transport).await;
    assert!(
        fx.bridge
            .sessions()
            .resolve(&context)
            .unwrap()
            .binding
            .conversation
            .is_some()
    );

    let run = submit(&fx.bridge, InboundRequest::new(context.clone(), "expire")).await;
    let result = finish(run, &context, &transport).await;
    assert!(matches!(result.state, RunState::Failed(_)));

    let session = fx.bridge.sessions().resolve(&context).unwrap();
    assert_eq!(session.binding.conversation, None);
}

#[tokio::test]
async fn busy_worktree_cannot_be_removed_until_run_is_cancelled() {
    let fx = fixture();
    let context = ChatContext::terminal("dev");
    let transport = Recording::default();

    let mut run = submit(
        &fx.bridge,
        InboundRequest::new(context.clone(), "block").with_branch("busy"),
    )
    .await;
    let path = run.worktree.clone();

    // Wait until the agent is up
    let first = run.events.next().await.unwrap();
    assert!(!first.is_terminal());

    assert!(matches!(
        fx.bridge.remove_worktree("demo", "busy").await,
        Err(BridgeError::WorktreeBusy { .. })
    ));
    assert!(matches!(
        fx.bridge.remove_project("demo"),
        Err(BridgeError::WorktreeBusy { .. })
    ));

    let (run_id, outcome) = fx.bridge.cancel_context(&context).unwrap().unwrap();
    assert_eq!(run_id, run.handle.run_id);
    assert_eq!(outcome, CancelOutcome::Signalled);
    let result = finish(run, &context, &transport).await;
    assert_eq!(result.state, RunState::Cancelled);

    fx.bridge.remove_worktree("demo", "busy").await.unwrap();
    assert!(!path.exists());
    assert!(fx.bridge.list_worktrees("demo").unwrap().is_empty());
}

#[tokio::test]
async fn second_chat_on_the_same_branch_waits_its_turn() {
    let fx = fixture();
    let alice = ChatContext::chat(1, None);
    let bob = ChatContext::chat(2, None);
    let transport = Recording::default();

    let first = submit(
        &fx.bridge,
        InboundRequest::new(alice.clone(), "block").with_branch("shared"),
    )
    .await;
    let second = submit(
        &fx.bridge,
        InboundRequest::new(bob.clone(), "hi").with_branch("shared"),
    )
    .await;
    assert_eq!(second.handle.waiting_ahead, 1);
    assert_eq!(fx.bridge.queue_depth(&second.handle.key), 1);

    fx.bridge.cancel(first.handle.run_id).unwrap();
    assert_eq!(
        finish(first, &alice, &transport).await.state,
        RunState::Cancelled
    );
    assert_eq!(
        finish(second, &bob, &transport).await.state,
        RunState::Completed
    );
}

#[tokio::test]
async fn attachments_land_in_the_worktree() {
    let fx = fixture();
    let context = ChatContext::terminal("dev");
    let transport = Recording::default();

    let request = InboundRequest::new(context.clone(), "look")
        .with_attachment(chatrelay::transport::Attachment::new("../trace.log", b"stack".to_vec()));
    let run = submit(&fx.bridge, request).await;

    assert_eq!(run.attachments, vec![std::path::PathBuf::from("incoming/trace.log")]);
    let saved = run.worktree.join("incoming/trace.log");
    assert_eq!(std::fs::read(&saved).unwrap(), b"stack");
    finish(run, &context, &transport).await;
}

#[tokio::test]
async fn unknown_engine_is_rejected_before_queueing() {
    let fx = fixture();
    let request = InboundRequest::new(ChatContext::terminal("dev"), "hello").with_engine("nope");

    assert!(fx.bridge.handle(request).await.is_err());
    assert!(fx.bridge.scheduler().runs().is_empty());
}

#[tokio::test]
async fn state_directory_admits_one_bridge() {
    let fx = fixture();
    let again = Bridge::open(fx.bridge.config().clone());
    assert!(matches!(again, Err(BridgeError::Store { .. })));
}

#[tokio::test]
async fn removal_racing_a_message_never_strands_the_run() {
    let fx = fixture();
    let context = ChatContext::terminal("dev");
    let transport = Recording::default();

    for round in 0..5 {
        fx.bridge.ensure_worktree("demo", "racy").await.unwrap();
        let request = InboundRequest::new(context.clone(), format!("round{}", round))
            .with_branch("racy");
        let (handled, removed) = tokio::join!(
            fx.bridge.handle(request),
            fx.bridge.remove_worktree("demo", "racy")
        );

        assert!(
            matches!(removed, Ok(()) | Err(BridgeError::WorktreeBusy { .. })),
            "{:?}",
            removed
        );
        let Reply::Submitted(run) = handled.unwrap() else {
            panic!("expected a run");
        };
        let result = finish(run, &context, &transport).await;
        assert_eq!(result.state, RunState::Completed, "round {}", round);
    }
}

#[tokio::test]
async fn concurrent_first_messages_from_one_chat_both_run() {
    let fx = fixture();
    let context = ChatContext::chat(9, None);
    let transport = Recording::default();

    let (a, b) = tokio::join!(
        fx.bridge
            .handle(InboundRequest::new(context.clone(), "a").with_branch("left")),
        fx.bridge
            .handle(InboundRequest::new(context.clone(), "b").with_branch("right")),
    );
    let (Reply::Submitted(a), Reply::Submitted(b)) = (a.unwrap(), b.unwrap()) else {
        panic!("both messages should start runs");
    };
    let keys = [a.handle.key.clone(), b.handle.key.clone()];
    assert_ne!(keys[0], keys[1]);

    let bound = fx.bridge.sessions().resolve(&context).unwrap().binding.key();
    assert!(keys.contains(&bound), "{} not in {:?}", bound, keys);

    assert_eq!(finish(a, &context, &transport).await.state, RunState::Completed);
    assert_eq!(finish(b, &context, &transport).await.state, RunState::Completed);
}
