use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use session_sync::SessionSyncConfig;

mod cli;

#[derive(Parser)]
#[command(name = "build-chat")]
#[command(about = "Chat with the build assistant from a terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.buildchat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a conversation live and send messages from stdin
    Attach(AttachArgs),

    /// Print the persisted transcript of a conversation
    Show(ShowArgs),

    /// Create a conversation from a seed prompt
    New(NewArgs),
}

#[derive(Parser)]
struct AttachArgs {
    /// Conversation id
    chat_id: String,
}

#[derive(Parser)]
struct ShowArgs {
    /// Conversation id
    chat_id: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
pub(crate) struct NewArgs {
    /// Team that owns the conversation
    #[arg(long)]
    team_id: i64,

    /// First message of the conversation
    #[arg(long)]
    prompt: String,

    /// Attach to an existing project
    #[arg(long)]
    project_id: Option<i64>,

    /// Technology stack for a new project
    #[arg(long)]
    stack_id: Option<i64>,

    /// Display name
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "build_chat=debug,session_sync=debug,info"
    } else {
        "build_chat=info,session_sync=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    // stdout carries the transcript
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = SessionSyncConfig::load(cli.data_dir.clone())?;

    match cli.command {
        Commands::Attach(args) => cli::attach::attach_command(&config, &args.chat_id).await,
        Commands::Show(args) => cli::show_command(&config, &args.chat_id, args.json).await,
        Commands::New(args) => cli::new_command(&config, args).await,
    }
}
