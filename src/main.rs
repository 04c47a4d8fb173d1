//! CodeAct - command-line entry point.
//!
//! Runs one task, or reads tasks from stdin, on a single conversation thread.

use std::sync::Arc;

use clap::Parser;
use codeact::agent::{AgentError, AgentOptions, CodeActAgent, ThreadState};
use codeact::config::Config;
use codeact::llm::OpenRouterClient;
use codeact::sandbox::PythonSandbox;
use codeact::store::{FileThreadStore, InMemoryThreadStore, ThreadStore};
use codeact::tools::{builtin_tools, ToolRegistry};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "codeact", version, about = "An agent that acts by writing Python")]
struct Cli {
    /// Task to run. Tasks are read from stdin, one per line, when omitted.
    task: Option<String>,

    /// Model to use (overrides DEFAULT_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Conversation thread to resume or start
    #[arg(short, long, default_value = "default")]
    thread: String,

    /// Instructions placed ahead of the generated system prompt
    #[arg(long)]
    instructions: Option<String>,

    /// Forget the thread's saved history before starting
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codeact=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(model) = cli.model {
        config.default_model = model;
    }
    if cli.instructions.is_some() {
        config.base_instructions = cli.instructions;
    }
    info!("Loaded configuration: model={}", config.default_model);

    let llm = Arc::new(OpenRouterClient::with_base_url(
        config.api_key.clone(),
        config.llm_base_url.clone(),
    ));
    let sandbox = Arc::new(PythonSandbox::new(config.sandbox_config()));
    let tools = ToolRegistry::from_specs(builtin_tools())?;
    let agent = CodeActAgent::new(llm, sandbox, tools, AgentOptions::from_config(&config));

    let store: Box<dyn ThreadStore> = match &config.state_dir {
        Some(dir) => {
            info!("Persisting threads under {}", dir.display());
            Box::new(FileThreadStore::new(dir.clone()))
        }
        None => Box::new(InMemoryThreadStore::new()),
    };

    if cli.reset && store.delete(&cli.thread).await? {
        info!("Cleared thread {}", cli.thread);
    }
    let mut state = store.load(&cli.thread).await?.unwrap_or_default();

    if let Some(task) = cli.task {
        return run_one(&agent, store.as_ref(), &cli.thread, &mut state, &task).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if matches!(task, "exit" | "quit") {
            break;
        }

        if let Err(e) = run_one(&agent, store.as_ref(), &cli.thread, &mut state, task).await {
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}

/// Run one task with Ctrl-C wired to cancellation, then checkpoint the thread.
async fn run_one(
    agent: &CodeActAgent,
    store: &dyn ThreadStore,
    thread_id: &str,
    state: &mut ThreadState,
    task: &str,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = agent.run(state, task, &cancel).await;
    watcher.abort();
    store.save(thread_id, state).await?;

    match result {
        Ok(outcome) => {
            info!(
                "Answered in {} turn(s), {} variable(s) in scope",
                outcome.turns,
                state.context.len()
            );
            println!("{}", outcome.answer);
            Ok(())
        }
        Err(AgentError::Cancelled) => {
            eprintln!("Cancelled; the interrupted turn was discarded.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
