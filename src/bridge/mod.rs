//! Bridge facade
//!
//! Wires the registries, the worktree manager and the scheduler together and
//! implements the request path:
//!
//! 1. A resume token in the message, if any, selects the binding outright.
//! 2. Otherwise the chat context's session (plus any project/branch mention) does.
//! 3. The key is canonicalized and its worktree created on demand.
//! 4. The run is queued on that key; a recorder appends its events to the run log
//!    and stores the conversation it ended in on the session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::agent::{AgentEngine, EngineRegistry};
use crate::bus::Subscription;
use crate::config::Config;
use crate::domain::{
    ChatContext, FailureReason, ProcessFailureKind, ProgressKind, Project, ProjectName,
    RunId, RunRequest, RunResult, RunState, Session, SessionBinding, Worktree, WorktreeKey,
};
use crate::error::{BridgeError, Result};
use crate::resume;
use crate::run::{CancelOutcome, ProcessSupervisor, RunHandle, RunJournal, Scheduler};
use crate::session::SessionRegistry;
use crate::state::StateLock;
use crate::transport::{InboundRequest, LogSink, Transport};
use crate::workspace::{ProjectRegistry, WorktreeManager};

pub struct Bridge {
    _lock: StateLock,
    config: Config,
    projects: Arc<ProjectRegistry>,
    worktrees: WorktreeManager,
    sessions: Arc<SessionRegistry>,
    scheduler: Scheduler,
    engines: EngineRegistry,
    log: LogSink,
    contexts: Mutex<HashMap<ChatContext, Arc<tokio::sync::Mutex<()>>>>,
}

/// Result of handling an inbound request
#[derive(Debug)]
pub enum Reply {
    /// The message only (re)bound the context, e.g. a bare resume token
    Bound(Session),
    /// A run was queued
    Submitted(Submission),
}

#[derive(Debug)]
pub struct Submission {
    pub handle: RunHandle,
    pub session: Session,
    pub worktree: PathBuf,
    pub engine: String,
    /// Saved attachments, relative to the worktree
    pub attachments: Vec<PathBuf>,
    /// The run's events from its first one on
    pub events: Subscription,
    /// Finishes once the run's log is written and its conversation recorded
    pub recorder: JoinHandle<()>,
}

impl Bridge {
    /// Open every store under the configured state directory.
    ///
    /// Runs left in flight by a previous process are marked failed here.
    pub fn open(config: Config) -> Result<Self> {
        let state_dir = config.state_dir();
        let lock = StateLock::acquire(&state_dir)?;

        let engines = EngineRegistry::from_settings(&config.engines)?;
        let supervisor = ProcessSupervisor::new(engines.clone(), config.supervisor.clone());
        let scheduler = Scheduler::with_journal(
            Arc::new(supervisor),
            config.bus.capacity,
            RunJournal::open(&state_dir),
        )?;

        let projects = Arc::new(ProjectRegistry::open(&state_dir)?);
        let worktrees = WorktreeManager::open(
            projects.clone(),
            Arc::new(scheduler.clone()),
            &state_dir,
            config.worktrees.dir.clone(),
        )?;
        let sessions = Arc::new(SessionRegistry::open(&state_dir)?);

        tracing::info!(
            state_dir = %state_dir.display(),
            projects = projects.len(),
            sessions = sessions.len(),
            engines = ?engines.ids(),
            "bridge ready"
        );

        Ok(Self {
            _lock: lock,
            log: LogSink::new(&state_dir),
            config,
            projects,
            worktrees,
            sessions,
            scheduler,
            engines,
            contexts: Mutex::new(HashMap::new()),
        })
    }

    /// Handle one inbound message.
    ///
    /// Messages from one chat context are handled one at a time, so the session read
    /// at the start is still current when it is bound or rebound.
    pub async fn handle(&self, request: InboundRequest) -> Result<Reply> {
        let InboundRequest {
            context,
            text,
            project,
            branch,
            engine,
            attachments,
        } = request;

        let context_lock = self.context_lock(&context);
        let _context_guard = context_lock.lock().await;

        let (token, text) = match resume::find_token(&text) {
            Some((token, rest)) => (Some(resume::decode(&token)?), rest),
            None => (None, text.trim().to_string()),
        };

        let existing = match self.sessions.resolve(&context) {
            Ok(session) => Some(session),
            Err(BridgeError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        let (project, branch) = match &token {
            Some(binding) => (
                binding.project.clone(),
                binding.branch.as_ref().map(|b| b.as_str().to_string()),
            ),
            None => self.target_key(existing.as_ref(), project.as_deref(), branch.as_deref())?,
        };
        // Held until the run is queued so the worktree cannot be removed in between
        let (resolved, _key_guard) = self
            .worktrees
            .resolve_held(&project, branch.as_deref())
            .await?;

        // Staying on the same key keeps the conversation; moving starts a fresh one
        let conversation = match token {
            Some(binding) => binding.conversation,
            None => existing
                .as_ref()
                .filter(|s| s.binding.key() == resolved.key)
                .and_then(|s| s.binding.conversation.clone()),
        };
        let binding = SessionBinding::new(resolved.key.clone(), conversation);

        let session = match &existing {
            Some(session) if session.binding == binding => session.clone(),
            Some(_) => self.sessions.rebind(&context, binding)?,
            None => self.sessions.bind(&context, binding)?,
        };

        if text.is_empty() && attachments.is_empty() {
            return Ok(Reply::Bound(session));
        }

        let engine = self.pick_engine(engine.as_deref(), &session)?;

        let mut saved = Vec::with_capacity(attachments.len());
        for attachment in &attachments {
            saved.push(attachment.save_into(&resolved.path)?);
        }

        let run = RunRequest {
            key: resolved.key.clone(),
            worktree_path: resolved.path.clone(),
            engine: engine.clone(),
            conversation: session.binding.conversation.clone(),
            input: compose_input(&text, &saved),
            context: Some(context.clone()),
        };
        let (handle, [recorder, events]) = self.scheduler.submit_watched::<2>(run);
        let recorder = self.spawn_recorder(recorder, context, resolved.key);

        Ok(Reply::Submitted(Submission {
            handle,
            session,
            worktree: resolved.path,
            engine,
            attachments: saved,
            events,
            recorder,
        }))
    }

    fn context_lock(&self, context: &ChatContext) -> Arc<tokio::sync::Mutex<()>> {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.entry(context.clone()).or_default().clone()
    }

    /// Deliver a run's events through `transport` until the terminal one.
    ///
    /// Delivery failures are logged and skipped. Returns the run's result, or `None`
    /// if the subscription ended without one.
    pub async fn pump(
        events: &mut Subscription,
        context: &ChatContext,
        transport: &dyn Transport,
    ) -> Option<RunResult> {
        while let Some(event) = events.next().await {
            if let Err(e) = transport.deliver(context, &event).await {
                tracing::warn!(run_id = event.run_id, seq = event.seq, error = %e, "delivery failed");
            }
            if let ProgressKind::Result(result) = event.kind {
                return Some(result);
            }
        }
        None
    }

    /// Follow a run that is already under way; events before this call are not seen.
    pub fn attach(&self, run_id: RunId) -> Result<Subscription> {
        self.scheduler.subscribe(run_id)
    }

    pub fn register_project(
        &self,
        name: &str,
        root: &Path,
        default_engine: Option<&str>,
    ) -> Result<Project> {
        let default_engine = default_engine
            .map(|id| self.engines.get(id).map(|e| e.id().to_string()))
            .transpose()?;
        self.projects.register(name, root, default_engine)
    }

    /// Unregister a project. Its worktrees stay on disk but leave the inventory.
    pub fn remove_project(&self, name: &str) -> Result<Project> {
        let project = self.projects.lookup(name)?;
        if let Some(run) = self
            .scheduler
            .runs()
            .into_iter()
            .find(|r| r.key.project == project.name && !r.state.is_terminal())
        {
            return Err(BridgeError::WorktreeBusy {
                key: run.key.to_string(),
            });
        }
        self.worktrees.forget_project(&project.name)?;
        self.projects.remove(&project.name)
    }

    pub async fn ensure_worktree(&self, project: &str, branch: &str) -> Result<PathBuf> {
        let project = self.projects.lookup(project)?;
        self.worktrees.ensure(&project.name, branch).await
    }

    pub fn list_worktrees(&self, project: &str) -> Result<Vec<Worktree>> {
        let project = self.projects.lookup(project)?;
        self.worktrees.list(&project.name)
    }

    pub async fn remove_worktree(&self, project: &str, branch: &str) -> Result<()> {
        let project = self.projects.lookup(project)?;
        self.worktrees.remove(&project.name, branch).await
    }

    pub fn cancel(&self, run_id: RunId) -> Result<CancelOutcome> {
        self.scheduler.cancel(run_id)
    }

    /// Cancel whatever is running on the key a chat context is bound to
    pub fn cancel_context(&self, context: &ChatContext) -> Result<Option<(RunId, CancelOutcome)>> {
        let session = self.sessions.resolve(context)?;
        let Some(run_id) = self.scheduler.active_run(&session.binding.key()) else {
            return Ok(None);
        };
        Ok(Some((run_id, self.scheduler.cancel(run_id)?)))
    }

    pub fn queue_depth(&self, key: &WorktreeKey) -> usize {
        self.scheduler.queue_depth(key)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn projects(&self) -> &ProjectRegistry {
        &self.projects
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Project and branch a token-less request targets
    fn target_key(
        &self,
        existing: Option<&Session>,
        project: Option<&str>,
        branch: Option<&str>,
    ) -> Result<(ProjectName, Option<String>)> {
        let project = match (project, existing) {
            (Some(name), _) => self.projects.lookup(name)?.name,
            (None, Some(session)) => session.binding.project.clone(),
            (None, None) => self
                .projects
                .sole()
                .map(|p| p.name)
                .ok_or_else(|| BridgeError::not_found("project", "<unspecified>"))?,
        };

        let branch = match branch {
            Some(branch) => Some(branch.to_string()),
            None => existing
                .filter(|s| s.binding.project == project)
                .and_then(|s| s.binding.branch.as_ref())
                .map(|b| b.as_str().to_string()),
        };
        Ok((project, branch))
    }

    /// Explicit choice, then the engine of the conversation being resumed, then the
    /// project default, then the global default
    fn pick_engine(&self, explicit: Option<&str>, session: &Session) -> Result<String> {
        let id = match explicit {
            Some(id) => id.to_string(),
            None => match &session.binding.conversation {
                Some(conversation) => conversation.engine.clone(),
                None => self
                    .projects
                    .get(&session.binding.project)?
                    .default_engine
                    .unwrap_or_else(|| self.config.default_engine.clone()),
            },
        };
        let engine: Arc<dyn AgentEngine> = self.engines.get(&id)?;
        Ok(engine.id().to_string())
    }

    fn spawn_recorder(
        &self,
        mut events: Subscription,
        context: ChatContext,
        key: WorktreeKey,
    ) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let log = self.log.clone();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = log.append(&event) {
                    tracing::warn!(run_id = event.run_id, error = %e, "failed to append run log");
                }
                let ProgressKind::Result(result) = event.kind else {
                    continue;
                };

                let conversation = if is_expired(&result.state) {
                    None
                } else if result.conversation.is_some() {
                    result.conversation
                } else {
                    continue;
                };
                if let Err(e) = sessions.record_conversation(&context, &key, conversation) {
                    tracing::warn!(context = %context, error = %e, "failed to record conversation");
                }
            }
            if events.missed() > 0 {
                tracing::warn!(
                    run_id = events.run_id(),
                    missed = events.missed(),
                    "run log is missing events"
                );
            }
        })
    }
}

fn is_expired(state: &RunState) -> bool {
    matches!(
        state,
        RunState::Failed(FailureReason::ProcessFailure {
            kind: ProcessFailureKind::ConversationExpired,
            ..
        })
    )
}

/// The prompt handed to the engine: the message plus a note about uploaded files
fn compose_input(text: &str, attachments: &[PathBuf]) -> String {
    if attachments.is_empty() {
        return text.to_string();
    }
    let files: Vec<String> = attachments
        .iter()
        .map(|p| format!("- {}", p.display()))
        .collect();
    let note = format!("Attached files:\n{}", files.join("\n"));
    if text.is_empty() {
        note
    } else {
        format!("{}\n\n{}", text, note)
    }
}
