use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Drive coding agents from chat, one git worktree per branch")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to ~/.chatrelay/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the state directory
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a git repository as a project
    Init {
        /// Project name
        name: String,

        /// Repository root (defaults to the repository containing the current directory)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Default engine for this project
        #[arg(long)]
        engine: Option<String>,
    },

    /// List registered projects
    Projects {
        #[arg(long)]
        json: bool,
    },

    /// Manage branch worktrees
    Worktree {
        #[command(subcommand)]
        command: cli::worktree::WorktreeCommand,
    },

    /// List chat sessions
    Sessions {
        #[arg(long)]
        json: bool,
    },

    /// Inspect or drop one session
    Session {
        #[command(subcommand)]
        command: cli::session::SessionCommand,
    },

    /// Resume token utilities
    Token {
        #[command(subcommand)]
        command: cli::token::TokenCommand,
    },

    /// Run an agent from this terminal and stream its progress
    Run(cli::run::RunArgs),

    /// Cancel a run
    Cancel {
        run_id: u64,
    },

    /// List configured engines and whether their CLIs are installed
    Engines,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli::load_config(cli.config.as_deref(), cli.state_dir)?;

    match cli.command {
        Commands::Init { name, path, engine } => {
            cli::init::init_command(config, cli.config.as_deref(), &name, path, engine)?;
        }
        Commands::Projects { json } => {
            cli::project::list(&config, json)?;
        }
        Commands::Worktree { command } => {
            cli::worktree::worktree_command(config, command).await?;
        }
        Commands::Sessions { json } => {
            cli::session::list(&config, json)?;
        }
        Commands::Session { command } => {
            cli::session::session_command(&config, command)?;
        }
        Commands::Token { command } => {
            cli::token::token_command(command)?;
        }
        Commands::Run(args) => {
            cli::run::run_command(config, args).await?;
        }
        Commands::Cancel { run_id } => {
            cli::run::cancel_command(config, run_id)?;
        }
        Commands::Engines => {
            cli::engines::list(&config)?;
        }
    }

    Ok(())
}
