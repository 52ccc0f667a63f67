//! Run and cancel commands

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;

use chatrelay::bridge::{Bridge, Reply};
use chatrelay::config::Config;
use chatrelay::resume;
use chatrelay::run::CancelOutcome;
use chatrelay::transport::{Attachment, InboundRequest, TerminalTransport};
use chatrelay::{ChatContext, RunState};

#[derive(Args)]
pub struct RunArgs {
    /// Prompt for the agent; may include a resume token
    #[arg(trailing_var_arg = true)]
    pub prompt: Vec<String>,

    #[arg(long)]
    pub project: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,

    #[arg(long)]
    pub engine: Option<String>,

    /// Terminal session name; runs under one name share a conversation
    #[arg(long, default_value = "cli")]
    pub session: String,

    /// Files to place in the worktree's incoming/ directory
    #[arg(long = "file")]
    pub files: Vec<PathBuf>,

    /// Print elapsed-time ticks
    #[arg(long)]
    pub ticks: bool,
}

pub async fn run_command(config: Config, args: RunArgs) -> Result<()> {
    let bridge = Bridge::open(config)?;
    let context = ChatContext::terminal(args.session);

    let mut request = InboundRequest::new(context.clone(), args.prompt.join(" "));
    request.project = args.project;
    request.branch = args.branch;
    request.engine = args.engine;
    for path in &args.files {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        request.attachments.push(Attachment::new(name, data));
    }

    let mut submission = match bridge.handle(request).await? {
        Reply::Bound(session) => {
            println!("{} is now bound to {}", context, session.binding.key());
            println!("resume: {}", resume::encode(&session.binding));
            return Ok(());
        }
        Reply::Submitted(submission) => submission,
    };

    let run_id = submission.handle.run_id;
    if submission.handle.waiting_ahead > 0 {
        eprintln!(
            "Run #{} queued behind {} run(s) on {}",
            run_id, submission.handle.waiting_ahead, submission.handle.key
        );
    }

    let transport = TerminalTransport::stdout().with_ticks(args.ticks);
    let result = tokio::select! {
        result = Bridge::pump(&mut submission.events, &context, &transport) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling run #{}...", run_id);
            bridge.cancel(run_id)?;
            Bridge::pump(&mut submission.events, &context, &transport).await
        }
    };
    let _ = submission.recorder.await;

    match result {
        Some(result) if result.state == RunState::Completed => Ok(()),
        Some(result) => bail!("Run #{} {}", run_id, result.state),
        None => bail!("Run #{} ended without a result", run_id),
    }
}

pub fn cancel_command(config: Config, run_id: u64) -> Result<()> {
    let bridge = Bridge::open(config)
        .context("Runs can only be cancelled by the chatrelay process that started them")?;

    match bridge.cancel(run_id)? {
        CancelOutcome::Dequeued => println!("Run #{} removed from its queue", run_id),
        CancelOutcome::Signalled => println!("Run #{} is being stopped", run_id),
        CancelOutcome::AlreadyFinished => {
            let state = bridge
                .scheduler()
                .snapshot(run_id)
                .map(|s| s.state.to_string())
                .unwrap_or_else(|| "finished".to_string());
            println!("Run #{} already finished: {}", run_id, state);
        }
    }
    Ok(())
}
