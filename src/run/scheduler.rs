//! Per-key FIFO run scheduler
//!
//! Every worktree key has its own queue and at most one running run. Runs on
//! different keys execute concurrently and never wait on each other. A run is
//! dispatched by spawning a task that drives the [`RunExecutor`]; when the executor
//! returns (or panics) the run is completed and the next queued run on the same key
//! is promoted.
//!
//! The scheduler owns each run's [`EventBus`] and publishes the terminal `Result`
//! event itself, so a run emits exactly one terminal event no matter how it ended.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::journal::{HISTORY_LIMIT, JournalWriter, RunJournal, retain_recent};
use crate::bus::{EventBus, Subscription};
use crate::domain::{
    FailureReason, ProcessFailureKind, ProgressKind, RunId, RunOutcome, RunRequest, RunResult,
    RunSnapshot, RunState, SessionBinding, WorktreeKey,
};
use crate::error::{BridgeError, Result};
use crate::resume;
use crate::workspace::KeyOccupancy;

/// Executes one dispatched run to completion
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Run `request`, publishing non-terminal progress on `bus`.
    ///
    /// Must return once `cancel` fires. The returned outcome's state must be terminal.
    async fn execute(
        &self,
        run_id: RunId,
        request: RunRequest,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> RunOutcome;
}

/// What `submit` hands back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: RunId,
    pub key: WorktreeKey,
    /// Per-key sequence number, in submission order
    pub seq: u64,
    /// Runs on the same key that will finish before this one starts
    pub waiting_ahead: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run was still queued and will never start
    Dequeued,
    /// The run's process was asked to stop; its terminal event follows
    Signalled,
    /// The run had already finished
    AlreadyFinished,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    executor: Arc<dyn RunExecutor>,
    bus_capacity: usize,
    journal: Option<Arc<JournalWriter>>,
}

#[derive(Default)]
struct State {
    next_id: RunId,
    keys: HashMap<WorktreeKey, KeyQueue>,
    runs: HashMap<RunId, RunRecord>,
}

#[derive(Default)]
struct KeyQueue {
    active: Option<RunId>,
    pending: VecDeque<RunId>,
    last_seq: u64,
}

struct RunRecord {
    snapshot: RunSnapshot,
    /// `None` for runs loaded from the journal of an earlier process
    live: Option<LiveRun>,
}

struct LiveRun {
    request: RunRequest,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    state: watch::Sender<RunState>,
    outcome: Option<RunOutcome>,
}

struct Dispatch {
    run_id: RunId,
    request: RunRequest,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// In-memory scheduler without a journal
    pub fn new(executor: Arc<dyn RunExecutor>, bus_capacity: usize) -> Self {
        Self::build(executor, bus_capacity, None, Vec::new())
    }

    /// Scheduler that records every transition in `journal`.
    ///
    /// Runs left in flight by a previous process are reconciled to
    /// `Failed(SupervisorRestart)` first and kept as history.
    pub fn with_journal(
        executor: Arc<dyn RunExecutor>,
        bus_capacity: usize,
        journal: RunJournal,
    ) -> Result<Self> {
        let history = journal.load_and_reconcile()?;
        let writer = JournalWriter::new(journal);
        Ok(Self::build(executor, bus_capacity, Some(writer), history))
    }

    fn build(
        executor: Arc<dyn RunExecutor>,
        bus_capacity: usize,
        journal: Option<Arc<JournalWriter>>,
        history: Vec<RunSnapshot>,
    ) -> Self {
        let mut state = State {
            next_id: 1,
            ..State::default()
        };
        for snapshot in history {
            state.next_id = state.next_id.max(snapshot.id + 1);
            let queue = state.keys.entry(snapshot.key.clone()).or_default();
            queue.last_seq = queue.last_seq.max(snapshot.seq);
            state.runs.insert(
                snapshot.id,
                RunRecord {
                    snapshot,
                    live: None,
                },
            );
        }

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                executor,
                bus_capacity,
                journal,
            }),
        }
    }

    /// Enqueue a run. It starts immediately if its key is idle.
    pub fn submit(&self, request: RunRequest) -> RunHandle {
        self.submit_watched::<0>(request).0
    }

    /// Enqueue a run with `N` subscriptions taken before it can start, so each of
    /// them sees the run's first event.
    pub fn submit_watched<const N: usize>(
        &self,
        request: RunRequest,
    ) -> (RunHandle, [Subscription; N]) {
        let (handle, subscriptions, dispatch, write) = {
            let mut state = self.lock();
            let run_id = state.next_id;
            state.next_id += 1;

            let key = request.key.clone();
            let queue = state.keys.entry(key.clone()).or_default();
            queue.last_seq += 1;
            let seq = queue.last_seq;
            let waiting_ahead = queue.pending.len() + usize::from(queue.active.is_some());
            queue.pending.push_back(run_id);

            let snapshot = RunSnapshot {
                id: run_id,
                seq,
                key: key.clone(),
                engine: request.engine.clone(),
                conversation: request.conversation.clone(),
                context: request.context.clone(),
                state: RunState::Queued,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
            };
            let (state_tx, _) = watch::channel(RunState::Queued);
            let bus = Arc::new(EventBus::new(run_id, self.inner.bus_capacity));
            let subscriptions: [Subscription; N] = std::array::from_fn(|_| bus.subscribe());
            let live = LiveRun {
                request,
                bus,
                cancel: CancellationToken::new(),
                state: state_tx,
                outcome: None,
            };
            state.runs.insert(
                run_id,
                RunRecord {
                    snapshot,
                    live: Some(live),
                },
            );
            tracing::info!(run_id, key = %key, seq, waiting_ahead, "run queued");

            let dispatch = promote(&mut state, &key);
            let write = self.stage_journal(&state);
            (
                RunHandle {
                    run_id,
                    key,
                    seq,
                    waiting_ahead,
                },
                subscriptions,
                dispatch,
                write,
            )
        };

        if write {
            self.schedule_journal_write();
        }
        if let Some(dispatch) = dispatch {
            self.spawn(dispatch);
        }
        (handle, subscriptions)
    }

    /// Cancel a run. Queued runs are removed without ever starting; running runs
    /// have their process signalled and end as `Cancelled`.
    pub fn cancel(&self, run_id: RunId) -> Result<CancelOutcome> {
        let mut state = self.lock();
        let record = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| BridgeError::not_found("run", run_id.to_string()))?;

        match record.snapshot.state {
            RunState::Queued => {
                let key = record.snapshot.key.clone();
                let conversation = record.snapshot.conversation.clone();
                finish(record, RunOutcome::cancelled(conversation));
                if let Some(queue) = state.keys.get_mut(&key) {
                    queue.pending.retain(|id| *id != run_id);
                }
                tracing::info!(run_id, key = %key, "queued run cancelled");
                trim_history(&mut state);
                let write = self.stage_journal(&state);
                drop(state);
                if write {
                    self.schedule_journal_write();
                }
                Ok(CancelOutcome::Dequeued)
            }
            RunState::Running => {
                if let Some(live) = &record.live {
                    live.cancel.cancel();
                }
                tracing::info!(run_id, "cancelling running run");
                Ok(CancelOutcome::Signalled)
            }
            _ => Ok(CancelOutcome::AlreadyFinished),
        }
    }

    /// Subscribe to a run's progress events. A subscription made after the run
    /// finished yields only the terminal event.
    pub fn subscribe(&self, run_id: RunId) -> Result<Subscription> {
        let state = self.lock();
        state
            .runs
            .get(&run_id)
            .and_then(|r| r.live.as_ref())
            .map(|live| live.bus.subscribe())
            .ok_or_else(|| BridgeError::not_found("run", run_id.to_string()))
    }

    /// Wait for a run to reach a terminal state.
    pub async fn wait(&self, run_id: RunId) -> Result<RunOutcome> {
        let mut receiver = {
            let state = self.lock();
            let record = state
                .runs
                .get(&run_id)
                .ok_or_else(|| BridgeError::not_found("run", run_id.to_string()))?;
            match &record.live {
                Some(live) => live.state.subscribe(),
                None => {
                    return Ok(RunOutcome {
                        state: record.snapshot.state.clone(),
                        answer: None,
                        conversation: record.snapshot.conversation.clone(),
                    });
                }
            }
        };

        // The sender lives in the record, so this only errors if the run was trimmed
        let _ = receiver.wait_for(|s| s.is_terminal()).await;

        let state = self.lock();
        let record = state
            .runs
            .get(&run_id)
            .ok_or_else(|| BridgeError::not_found("run", run_id.to_string()))?;
        Ok(record
            .live
            .as_ref()
            .and_then(|live| live.outcome.clone())
            .unwrap_or_else(|| RunOutcome {
                state: record.snapshot.state.clone(),
                answer: None,
                conversation: record.snapshot.conversation.clone(),
            }))
    }

    pub fn snapshot(&self, run_id: RunId) -> Option<RunSnapshot> {
        self.lock().runs.get(&run_id).map(|r| r.snapshot.clone())
    }

    /// All known runs, oldest first
    pub fn runs(&self) -> Vec<RunSnapshot> {
        let state = self.lock();
        let mut runs: Vec<RunSnapshot> = state.runs.values().map(|r| r.snapshot.clone()).collect();
        runs.sort_by_key(|r| r.id);
        runs
    }

    /// Queued (not yet running) runs on `key`
    pub fn queue_depth(&self, key: &WorktreeKey) -> usize {
        self.lock()
            .keys
            .get(key)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    /// The run currently executing on `key`
    pub fn active_run(&self, key: &WorktreeKey) -> Option<RunId> {
        self.lock().keys.get(key).and_then(|q| q.active)
    }

    fn spawn(&self, dispatch: Dispatch) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let run_id = dispatch.run_id;
            let executor = scheduler.inner.executor.clone();
            let task = tokio::spawn(async move {
                executor
                    .execute(
                        dispatch.run_id,
                        dispatch.request,
                        dispatch.bus,
                        dispatch.cancel,
                    )
                    .await
            });

            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(run_id, error = %e, "run executor panicked");
                    RunOutcome::failed(
                        FailureReason::process(ProcessFailureKind::Panic, e.to_string()),
                        None,
                    )
                }
            };
            scheduler.complete(run_id, outcome);
        });
    }

    /// Record the executor's outcome and promote the next run on the key.
    fn complete(&self, run_id: RunId, mut outcome: RunOutcome) {
        let (dispatch, write) = {
            let mut state = self.lock();
            let Some(record) = state.runs.get_mut(&run_id) else {
                return;
            };
            if record.snapshot.state != RunState::Running {
                return;
            }

            let cancelled = record
                .live
                .as_ref()
                .is_some_and(|live| live.cancel.is_cancelled());
            if cancelled {
                outcome.state = RunState::Cancelled;
            } else if !outcome.state.is_terminal() {
                outcome.state = RunState::Failed(FailureReason::process(
                    ProcessFailureKind::Exit,
                    "executor returned without a terminal state",
                ));
            }
            if outcome.conversation.is_none() {
                outcome.conversation = record.snapshot.conversation.clone();
            }

            let key = record.snapshot.key.clone();
            tracing::info!(run_id, key = %key, state = %outcome.state, "run finished");
            finish(record, outcome);

            if let Some(queue) = state.keys.get_mut(&key) {
                if queue.active == Some(run_id) {
                    queue.active = None;
                }
            }
            let dispatch = promote(&mut state, &key);
            trim_history(&mut state);
            (dispatch, self.stage_journal(&state))
        };

        if write {
            self.schedule_journal_write();
        }
        if let Some(dispatch) = dispatch {
            self.spawn(dispatch);
        }
    }

    /// Write any journal update that is still pending. Transitions are otherwise
    /// written in the background.
    pub fn flush_journal(&self) {
        if let Some(journal) = &self.inner.journal {
            journal.write_staged();
        }
    }

    /// Stage the current run table for the journal. Called with the state locked so
    /// staged lists follow transition order; returns whether a write must be scheduled.
    fn stage_journal(&self, state: &State) -> bool {
        let Some(journal) = &self.inner.journal else {
            return false;
        };
        let runs: Vec<RunSnapshot> = state.runs.values().map(|r| r.snapshot.clone()).collect();
        journal.stage(retain_recent(runs))
    }

    /// Must be called after the state lock is released.
    fn schedule_journal_write(&self) {
        if let Some(journal) = &self.inner.journal {
            journal.schedule();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyOccupancy for Scheduler {
    fn is_occupied(&self, key: &WorktreeKey) -> bool {
        self.lock()
            .keys
            .get(key)
            .is_some_and(|q| q.active.is_some() || !q.pending.is_empty())
    }
}

/// Start the next queued run on `key` if the key is idle.
fn promote(state: &mut State, key: &WorktreeKey) -> Option<Dispatch> {
    let queue = state.keys.get_mut(key)?;
    if queue.active.is_some() {
        return None;
    }
    let run_id = queue.pending.pop_front()?;
    queue.active = Some(run_id);

    let record = state.runs.get_mut(&run_id)?;
    let live = record.live.as_ref()?;
    record.snapshot.state = RunState::Running;
    record.snapshot.started_at = Some(Utc::now());
    live.state.send_replace(RunState::Running);
    tracing::info!(run_id, key = %key, "run started");

    Some(Dispatch {
        run_id,
        request: live.request.clone(),
        bus: live.bus.clone(),
        cancel: live.cancel.clone(),
    })
}

/// Move a record into its terminal state and publish the terminal event.
fn finish(record: &mut RunRecord, outcome: RunOutcome) {
    record.snapshot.state = outcome.state.clone();
    record.snapshot.finished_at = Some(Utc::now());
    record.snapshot.conversation = outcome.conversation.clone();

    let Some(live) = record.live.as_mut() else {
        return;
    };
    let binding = SessionBinding::new(record.snapshot.key.clone(), outcome.conversation.clone());
    live.bus.publish(ProgressKind::Result(RunResult {
        state: outcome.state.clone(),
        answer: outcome.answer.clone(),
        conversation: outcome.conversation.clone(),
        resume_token: Some(resume::encode(&binding)),
    }));
    live.outcome = Some(outcome.clone());
    live.state.send_replace(outcome.state);
}

/// Keep the in-memory run table bounded the same way the journal is.
fn trim_history(state: &mut State) {
    let mut terminal: Vec<RunId> = state
        .runs
        .values()
        .filter(|r| r.snapshot.state.is_terminal())
        .map(|r| r.snapshot.id)
        .collect();
    if terminal.len() <= HISTORY_LIMIT {
        return;
    }
    terminal.sort_unstable();
    let excess = terminal.len() - HISTORY_LIMIT;
    for run_id in &terminal[..excess] {
        state.runs.remove(run_id);
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
