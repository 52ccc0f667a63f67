//! Agent process supervision
//!
//! One supervised process per run. The supervisor spawns the engine in the run's
//! worktree as the leader of a fresh process group, feeds it its input, and turns
//! its stdout into progress events. It enforces the inactivity ceiling and handles
//! cancellation (SIGTERM to the group, then SIGKILL after the grace period).

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, sleep_until};
use tokio_util::sync::CancellationToken;

use super::scheduler::RunExecutor;
use super::signal;
use crate::agent::{AgentEngine, EngineLine, EngineRegistry, install_message};
use crate::bus::EventBus;
use crate::config::SupervisorSettings;
use crate::domain::{
    ConversationRef, FailureReason, ProcessFailureKind, ProgressKind, RunId, RunOutcome,
    RunRequest,
};

/// stderr lines kept for failure messages
const STDERR_TAIL: usize = 5;

const STDERR_DRAIN: Duration = Duration::from_millis(500);

pub struct ProcessSupervisor {
    engines: EngineRegistry,
    settings: SupervisorSettings,
}

impl ProcessSupervisor {
    pub fn new(engines: EngineRegistry, settings: SupervisorSettings) -> Self {
        Self { engines, settings }
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }
}

/// What the run learned from the engine's output
#[derive(Default)]
struct Transcript {
    conversation: Option<String>,
    answer: Option<String>,
    error: Option<String>,
    completed: Option<(bool, Option<String>, Option<String>)>,
    stderr_tail: VecDeque<String>,
}

impl Transcript {
    fn absorb(&mut self, bus: &EventBus, lines: Vec<EngineLine>) {
        for line in lines {
            match line {
                EngineLine::Event(kind) => {
                    bus.publish(kind);
                }
                EngineLine::Conversation(id) => self.conversation = Some(id),
                EngineLine::Answer(text) => self.answer = Some(text),
                EngineLine::Error(text) => self.error = Some(text),
                EngineLine::Completed { ok, answer, error } => {
                    self.completed = Some((ok, answer, error));
                }
            }
        }
    }

    fn stderr(&mut self, line: String) {
        if self.stderr_tail.len() == STDERR_TAIL {
            self.stderr_tail.pop_front();
        }
        self.stderr_tail.push_back(line);
    }

    fn stderr_text(&self) -> String {
        self.stderr_tail
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl RunExecutor for ProcessSupervisor {
    async fn execute(
        &self,
        run_id: RunId,
        request: RunRequest,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let engine = match self.engines.get(&request.engine) {
            Ok(engine) => engine,
            Err(e) => {
                return RunOutcome::failed(
                    FailureReason::process(ProcessFailureKind::Spawn, e.to_string()),
                    request.conversation,
                );
            }
        };

        // A conversation from another engine cannot be resumed by this one
        let resume_id = request
            .conversation
            .as_ref()
            .filter(|c| c.engine == engine.id())
            .map(|c| c.id.clone());

        let invocation =
            engine.invocation(resume_id.as_deref(), &request.input, &request.worktree_path);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&request.worktree_path)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = if e.kind() == std::io::ErrorKind::NotFound {
                    install_message(engine.as_ref())
                } else {
                    format!("failed to spawn {}: {}", invocation.program, e)
                };
                tracing::warn!(run_id, engine = engine.id(), error = %e, "agent spawn failed");
                return RunOutcome::failed(
                    FailureReason::process(ProcessFailureKind::Spawn, message),
                    request.conversation,
                );
            }
        };
        let pid = child.id();
        tracing::info!(
            run_id,
            engine = engine.id(),
            pid,
            resume = resume_id.is_some(),
            worktree = %request.worktree_path.display(),
            "agent started"
        );

        if let (Some(input), Some(mut stdin)) = (invocation.stdin, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "agent closed stdin early");
                }
                // Dropping the handle closes the pipe
            });
        }

        let Some(stdout) = child.stdout.take() else {
            return RunOutcome::failed(
                FailureReason::process(ProcessFailureKind::Spawn, "stdout not captured"),
                request.conversation,
            );
        };
        let mut stdout = BufReader::new(stdout).lines();

        let (stderr_tx, mut stderr_rx) = mpsc::channel::<String>(256);
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if stderr_tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }

        let started = Instant::now();
        let inactivity = self.settings.inactivity_timeout();
        let mut deadline = tokio::time::Instant::now() + inactivity;
        let mut ticker = tokio::time::interval(self.settings.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut transcript = Transcript::default();
        let mut stdout_done = false;
        let mut stderr_done = false;

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    terminate(&mut child, pid, self.settings.grace_period()).await;
                    tracing::info!(run_id, pid, "agent cancelled");
                    return RunOutcome::cancelled(
                        self.conversation(engine.as_ref(), &transcript, &request),
                    );
                }
                line = stdout.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => {
                        deadline = tokio::time::Instant::now() + inactivity;
                        transcript.absorb(&bus, engine.parse_line(&line));
                    }
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        tracing::warn!(run_id, error = %e, "failed to read agent stdout");
                        stdout_done = true;
                    }
                },
                line = stderr_rx.recv(), if !stderr_done => match line {
                    Some(line) => {
                        deadline = tokio::time::Instant::now() + inactivity;
                        bus.publish(ProgressKind::status(format!("stderr: {}", line)));
                        transcript.stderr(line);
                    }
                    None => stderr_done = true,
                },
                _ = sleep_until(deadline) => {
                    tracing::warn!(run_id, pid, ?inactivity, "agent inactive, killing");
                    kill(&mut child, pid).await;
                    return RunOutcome::failed(
                        FailureReason::Timeout,
                        self.conversation(engine.as_ref(), &transcript, &request),
                    );
                }
                _ = ticker.tick() => {
                    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    bus.publish(ProgressKind::Tick { elapsed_ms });
                }
                status = child.wait(), if stdout_done => match status {
                    Ok(status) => break status,
                    Err(e) => {
                        return RunOutcome::failed(
                            FailureReason::process(ProcessFailureKind::Exit, e.to_string()),
                            self.conversation(engine.as_ref(), &transcript, &request),
                        );
                    }
                },
            }
        };

        if !stderr_done {
            let drain = async {
                while let Some(line) = stderr_rx.recv().await {
                    bus.publish(ProgressKind::status(format!("stderr: {}", line)));
                    transcript.stderr(line);
                }
            };
            // A grandchild may keep the pipe open after the agent exits
            let _ = tokio::time::timeout(STDERR_DRAIN, drain).await;
        }

        let conversation = self.conversation(engine.as_ref(), &transcript, &request);
        let outcome = classify(
            engine.as_ref(),
            status,
            transcript,
            conversation,
            resume_id.is_some(),
        );
        tracing::info!(run_id, pid, %status, state = %outcome.state, "agent exited");
        outcome
    }
}

impl ProcessSupervisor {
    /// Conversation the run ended up in: the one the engine announced, else the one
    /// it resumed
    fn conversation(
        &self,
        engine: &dyn AgentEngine,
        transcript: &Transcript,
        request: &RunRequest,
    ) -> Option<ConversationRef> {
        match &transcript.conversation {
            Some(id) => Some(ConversationRef::new(engine.id(), id.clone())),
            None => request
                .conversation
                .clone()
                .filter(|c| c.engine == engine.id()),
        }
    }
}

/// A final result frame decides the outcome; without one, the exit status does.
fn classify(
    engine: &dyn AgentEngine,
    status: ExitStatus,
    transcript: Transcript,
    conversation: Option<ConversationRef>,
    resumed: bool,
) -> RunOutcome {
    let stderr = transcript.stderr_text();
    let (ok, answer, error) = match transcript.completed {
        Some((ok, answer, error)) => (ok, answer, error),
        None => (status.success(), None, None),
    };

    if ok {
        return RunOutcome::completed(answer.or(transcript.answer), conversation);
    }

    let message = error
        .or(transcript.error)
        .filter(|m| !m.trim().is_empty())
        .or_else(|| (!stderr.is_empty()).then(|| stderr.clone()))
        .unwrap_or_else(|| format!("exited with {}", status));

    let expired = resumed
        && (engine.is_conversation_expired(&message) || engine.is_conversation_expired(&stderr));
    if expired {
        return RunOutcome::failed(
            FailureReason::process(ProcessFailureKind::ConversationExpired, message),
            None,
        );
    }

    RunOutcome::failed(
        FailureReason::ProcessFailure {
            kind: ProcessFailureKind::Exit,
            message,
            exit_code: status.code(),
        },
        conversation,
    )
}

/// SIGTERM the process group, then SIGKILL it if it outlives the grace period.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    let signalled = pid.is_some_and(signal::terminate_group);
    if !signalled {
        let _ = child.start_kill();
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        tracing::debug!(?pid, "agent ignored SIGTERM, killing");
        kill(child, pid).await;
    } else if let Some(pid) = pid {
        // Reap anything the agent left behind in its group
        signal::kill_group(pid);
    }
}

async fn kill(child: &mut Child, pid: Option<u32>) {
    let killed = pid.is_some_and(signal::kill_group);
    if !killed {
        let _ = child.start_kill();
    }
    let _ = child.wait().await;
}

#[cfg(all(test, unix))]
#[path = "supervisor_tests.rs"]
mod tests;
