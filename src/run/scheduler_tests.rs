use super::*;
use crate::domain::{ConversationRef, ProjectName};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Behaves according to the request input:
/// - `block`: waits for cancellation, then claims success
/// - `panic`: panics
/// - a number: sleeps that many milliseconds and completes
#[derive(Default)]
struct ScriptedExecutor {
    log: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        run_id: RunId,
        request: RunRequest,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        self.record(format!("start {}", run_id));
        bus.publish(ProgressKind::status(format!("working on {}", request.input)));

        let outcome = match request.input.as_str() {
            "block" => {
                cancel.cancelled().await;
                RunOutcome::completed(Some("ignored".to_string()), None)
            }
            "panic" => panic!("executor blew up"),
            other => {
                let ms: u64 = other.parse().unwrap_or(10);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                RunOutcome::completed(
                    Some(format!("answer {}", run_id)),
                    Some(ConversationRef::new("fake", format!("conv-{}", run_id))),
                )
            }
        };
        self.record(format!("end {}", run_id));
        outcome
    }
}

fn key(branch: Option<&str>) -> WorktreeKey {
    WorktreeKey::new(
        ProjectName::new("proj").unwrap(),
        branch.map(|b| crate::domain::BranchName::new(b).unwrap()),
    )
}

fn request(key: &WorktreeKey, input: &str) -> RunRequest {
    RunRequest {
        key: key.clone(),
        worktree_path: PathBuf::from("/tmp"),
        engine: "fake".to_string(),
        conversation: None,
        input: input.to_string(),
        context: None,
    }
}

fn scheduler() -> (Scheduler, Arc<ScriptedExecutor>) {
    let executor = Arc::new(ScriptedExecutor::default());
    (Scheduler::new(executor.clone(), 64), executor)
}

#[tokio::test]
async fn runs_on_one_key_execute_in_submission_order() {
    let (scheduler, executor) = scheduler();
    let k = key(None);

    let handles: Vec<RunHandle> = (0..3)
        .map(|_| scheduler.submit(request(&k, "20")))
        .collect();
    assert_eq!(
        handles.iter().map(|h| h.waiting_ahead).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(
        handles.iter().map(|h| h.seq).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(scheduler.queue_depth(&k), 2);

    for handle in &handles {
        let outcome = scheduler.wait(handle.run_id).await.unwrap();
        assert_eq!(outcome.state, RunState::Completed);
    }

    assert_eq!(
        executor.log(),
        vec!["start 1", "end 1", "start 2", "end 2", "start 3", "end 3"]
    );
    assert!(!scheduler.is_occupied(&k));
}

#[tokio::test]
async fn different_keys_do_not_wait_on_each_other() {
    let (scheduler, _) = scheduler();
    let main = key(None);
    let feature = key(Some("feature"));

    let blocked = scheduler.submit(request(&main, "block"));
    let quick = scheduler.submit(request(&feature, "10"));
    assert_eq!(quick.waiting_ahead, 0);

    let outcome = tokio::time::timeout(Duration::from_secs(5), scheduler.wait(quick.run_id))
        .await
        .expect("run on another key should not be blocked")
        .unwrap();
    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(
        scheduler.snapshot(blocked.run_id).unwrap().state,
        RunState::Running
    );
    assert!(scheduler.is_occupied(&main));

    scheduler.cancel(blocked.run_id).unwrap();
    scheduler.wait(blocked.run_id).await.unwrap();
}

#[tokio::test]
async fn cancelled_queued_run_never_starts() {
    let (scheduler, executor) = scheduler();
    let k = key(None);

    let running = scheduler.submit(request(&k, "block"));
    let queued = scheduler.submit(request(&k, "10"));

    assert_eq!(
        scheduler.cancel(queued.run_id).unwrap(),
        CancelOutcome::Dequeued
    );
    let events: Vec<_> = scheduler
        .subscribe(queued.run_id)
        .unwrap()
        .into_stream()
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0].kind,
        ProgressKind::Result(RunResult { state: RunState::Cancelled, .. })
    ));

    assert_eq!(
        scheduler.cancel(running.run_id).unwrap(),
        CancelOutcome::Signalled
    );
    // The executor claims success after the signal; cancellation still wins
    let outcome = scheduler.wait(running.run_id).await.unwrap();
    assert_eq!(outcome.state, RunState::Cancelled);

    assert!(!executor.log().contains(&format!("start {}", queued.run_id)));
    assert_eq!(
        scheduler.cancel(running.run_id).unwrap(),
        CancelOutcome::AlreadyFinished
    );
    assert!(matches!(
        scheduler.cancel(999),
        Err(BridgeError::NotFound { .. })
    ));
}

#[tokio::test]
async fn executor_panic_fails_the_run_and_frees_the_key() {
    let (scheduler, _) = scheduler();
    let k = key(None);

    let crashed = scheduler.submit(request(&k, "panic"));
    let next = scheduler.submit(request(&k, "5"));

    let outcome = scheduler.wait(crashed.run_id).await.unwrap();
    assert!(matches!(
        outcome.state,
        RunState::Failed(FailureReason::ProcessFailure {
            kind: ProcessFailureKind::Panic,
            ..
        })
    ));
    assert_eq!(
        scheduler.wait(next.run_id).await.unwrap().state,
        RunState::Completed
    );
}

#[tokio::test]
async fn run_ends_with_single_terminal_event_carrying_resume_token() {
    let (scheduler, _) = scheduler();
    let k = key(Some("feature"));

    let handle = scheduler.submit(request(&k, "5"));
    let events: Vec<_> = scheduler
        .subscribe(handle.run_id)
        .unwrap()
        .into_stream()
        .collect()
        .await;

    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    let last = events.last().unwrap();
    let ProgressKind::Result(result) = &last.kind else {
        panic!("last event should be terminal");
    };
    assert_eq!(result.answer.as_deref(), Some("answer 1"));

    let binding = resume::decode(result.resume_token.as_deref().unwrap()).unwrap();
    assert_eq!(binding.key(), k);
    assert_eq!(
        binding.conversation,
        Some(ConversationRef::new("fake", "conv-1"))
    );
}

#[tokio::test]
async fn journal_keeps_history_across_restarts() {
    let dir = TempDir::new().unwrap();
    let k = key(None);

    {
        let scheduler = Scheduler::with_journal(
            Arc::new(ScriptedExecutor::default()),
            16,
            RunJournal::open(dir.path()),
        )
        .unwrap();
        let handle = scheduler.submit(request(&k, "5"));
        scheduler.wait(handle.run_id).await.unwrap();
        scheduler.flush_journal();
    }

    let scheduler = Scheduler::with_journal(
        Arc::new(ScriptedExecutor::default()),
        16,
        RunJournal::open(dir.path()),
    )
    .unwrap();
    let history = scheduler.runs();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, RunState::Completed);
    assert_eq!(
        scheduler.wait(1).await.unwrap().state,
        RunState::Completed
    );

    let handle = scheduler.submit(request(&k, "5"));
    assert_eq!(handle.run_id, 2);
    assert_eq!(handle.seq, 2);
    scheduler.wait(handle.run_id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_journal_write_does_not_hold_up_the_scheduler() {
    let dir = TempDir::new().unwrap();
    let scheduler = Scheduler::with_journal(
        Arc::new(ScriptedExecutor::default()),
        16,
        RunJournal::open(dir.path()),
    )
    .unwrap();
    let writer = scheduler.inner.journal.clone().unwrap();

    // Stall every journal write while runs are submitted and finish
    let stalled = writer.file.lock().unwrap();
    let k = key(Some("busy"));
    let submitter = scheduler.clone();
    let finished = tokio::time::timeout(Duration::from_secs(5), async move {
        let first = submitter.submit(request(&k, "5"));
        let second = submitter.submit(request(&k, "5"));
        submitter.wait(first.run_id).await.unwrap();
        submitter.wait(second.run_id).await.unwrap();
        submitter.runs()
    })
    .await
    .expect("scheduler must not wait on the journal file");
    assert!(finished.iter().all(|r| r.state == RunState::Completed));
    drop(stalled);

    scheduler.flush_journal();
    let journaled = RunJournal::open(dir.path()).load_and_reconcile().unwrap();
    assert_eq!(journaled.len(), 2);
    assert!(journaled.iter().all(|r| r.state == RunState::Completed));
}
