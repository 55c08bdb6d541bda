use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use task_protocol::{BackgroundOp, InteractionId, ThreadId};
use task_stream::{
    Dispatcher, DispatcherHandle, HttpTaskApi, StreamConfig, WsConnector,
    config::default_config_dir,
};
use tracing::warn;
use tracing_subscriber::prelude::*;

mod cli;

#[derive(Parser)]
#[command(name = "taskstream")]
#[command(about = "Follow background chat tasks from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config directory (defaults to ~/.taskstream)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Server base URL, overrides config.toml and TASKSTREAM_SERVER__BASE_URL
    #[arg(long, global = true)]
    server: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow every task still running on a thread
    Watch(ThreadArgs),

    /// Send a message and stream the reply
    Send(SendArgs),

    /// Compact a thread's context in the background
    Compact(ThreadArgs),

    /// Summarize a thread in the background
    Summarize(ThreadArgs),

    /// Answer a question a task is waiting on
    Answer(AnswerArgs),

    /// Cancel a question a task is waiting on
    Cancel(CancelArgs),
}

#[derive(Parser)]
struct ThreadArgs {
    /// Thread id
    #[arg(short, long)]
    thread: String,
}

#[derive(Parser)]
struct SendArgs {
    /// Thread id
    #[arg(short, long)]
    thread: String,

    /// Message text
    text: String,
}

#[derive(Parser)]
struct AnswerArgs {
    /// Interaction id shown on the question
    interaction_id: u64,

    /// Answer as JSON (e.g. `true`, `"staging"`, `{"env":"prod"}`)
    payload: String,
}

#[derive(Parser)]
struct CancelArgs {
    /// Interaction id shown on the question
    interaction_id: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "taskstream=debug,task_stream=debug,info"
    } else {
        "taskstream=info,task_stream=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => default_config_dir().context("Could not determine home directory")?,
    };
    let config = StreamConfig::load(&config_dir, cli.server.as_deref())
        .with_context(|| format!("Failed to load config from {}", config_dir.display()))?;

    let api = Arc::new(HttpTaskApi::new(config.endpoints.clone()));
    let handle = Dispatcher::spawn(
        &config,
        Arc::new(WsConnector),
        api,
        Box::new(cli::render::TerminalSink::new()),
    );

    // Ctrl-C only stops following; server-side tasks keep running
    let result = tokio::select! {
        result = run_command(&handle, cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n[taskstream: stopped following]");
            Ok(())
        }
    };

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "dispatcher already stopped");
    }
    result
}

async fn run_command(handle: &DispatcherHandle, command: Commands) -> Result<()> {
    match command {
        Commands::Watch(args) => cli::watch_command(handle, &ThreadId::new(args.thread)).await,
        Commands::Send(args) => {
            cli::send_command(handle, &ThreadId::new(args.thread), &args.text).await
        }
        Commands::Compact(args) => {
            cli::operation_command(handle, &ThreadId::new(args.thread), BackgroundOp::Compact).await
        }
        Commands::Summarize(args) => {
            cli::operation_command(handle, &ThreadId::new(args.thread), BackgroundOp::Summarize)
                .await
        }
        Commands::Answer(args) => {
            cli::answer_command(handle, InteractionId(args.interaction_id), &args.payload).await
        }
        Commands::Cancel(args) => {
            cli::cancel_command(handle, InteractionId(args.interaction_id)).await
        }
    }
}
