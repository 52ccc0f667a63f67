//! Resume token commands

use anyhow::{Context, Result};
use clap::Subcommand;

use chatrelay::resume;
use chatrelay::{BranchName, ConversationRef, ProjectName, SessionBinding, WorktreeKey};

#[derive(Subcommand)]
pub enum TokenCommand {
    /// Print the binding a token stands for
    Decode { token: String },

    /// Build a token by hand
    Encode {
        project: String,

        #[arg(long)]
        branch: Option<String>,

        /// Engine of the conversation (requires --conversation)
        #[arg(long, requires = "conversation")]
        engine: Option<String>,

        #[arg(long, requires = "engine")]
        conversation: Option<String>,

        /// Token format version
        #[arg(long, default_value_t = resume::CURRENT_VERSION)]
        version: u32,
    },
}

pub fn token_command(command: TokenCommand) -> Result<()> {
    match command {
        TokenCommand::Decode { token } => {
            let binding = resume::decode(token.trim()).context("Failed to decode resume token")?;
            println!("Project:      {}", binding.project);
            println!(
                "Branch:       {}",
                binding
                    .branch
                    .as_ref()
                    .map(|b| b.as_str())
                    .unwrap_or("(root checkout)")
            );
            match &binding.conversation {
                Some(conversation) => {
                    println!("Engine:       {}", conversation.engine);
                    println!("Conversation: {}", conversation.id);
                }
                None => println!("Conversation: (none)"),
            }
        }
        TokenCommand::Encode {
            project,
            branch,
            engine,
            conversation,
            version,
        } => {
            let key = WorktreeKey::new(
                ProjectName::new(project)?,
                branch.map(BranchName::new).transpose()?,
            );
            let conversation = engine
                .zip(conversation)
                .map(|(engine, id)| ConversationRef::new(engine, id));
            let binding = SessionBinding::new(key, conversation);
            println!("{}", resume::encode_version(version, &binding)?);
        }
    }
    Ok(())
}
