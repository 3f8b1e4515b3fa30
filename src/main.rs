//! claude-session - run Claude Code conversations from the shell

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use claude_session::{
    CliLocator, Config, Conversation, EntityStore, JsonFileStore, PermissionMode, TurnOptions,
    TurnUpdate,
};

const TITLE_LEN: usize = 50;

#[derive(Parser, Debug)]
#[command(name = "claude-session")]
#[command(about = "Resumable Claude Code conversations from the command line")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Store file (default: <data dir>/claude-session/store.json)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty conversation
    New {
        /// Project directory
        #[arg(short = 'd', long)]
        directory: Option<PathBuf>,

        /// Run turns in this worktree instead of the project directory
        #[arg(long)]
        worktree: Option<PathBuf>,

        #[arg(short, long, default_value = "New conversation")]
        title: String,
    },

    /// Send a prompt and stream the reply
    Send(SendArgs),

    /// Copy a conversation's transcript into a new one with a fresh session
    Fork { id: Uuid },

    /// Print a conversation's messages
    History { id: Uuid },

    /// List conversations
    List,
}

#[derive(clap::Args, Debug)]
struct SendArgs {
    /// Conversation to continue; a new one is created when omitted
    #[arg(short, long)]
    conversation: Option<Uuid>,

    /// Project directory for a new conversation
    #[arg(short = 'd', long)]
    directory: Option<PathBuf>,

    /// Model to use (e.g., sonnet, opus, haiku)
    #[arg(short, long)]
    model: Option<String>,

    /// Continue the most recent CLI session instead of this conversation's
    #[arg(long = "continue")]
    continue_session: bool,

    #[arg(long)]
    system_prompt: Option<String>,

    #[arg(long)]
    max_turns: Option<u32>,

    #[arg(long)]
    max_budget_usd: Option<f64>,

    /// Comma separated tool names
    #[arg(long, value_delimiter = ',')]
    allowed_tools: Vec<String>,

    /// default, acceptEdits, plan or bypassPermissions
    #[arg(long)]
    permission_mode: Option<PermissionMode>,

    prompt: String,
}

impl SendArgs {
    fn options(&self, config: &Config) -> TurnOptions {
        let mut options = config.turn_options();
        options.continue_session = self.continue_session;
        if self.model.is_some() {
            options.model = self.model.clone();
        }
        if self.system_prompt.is_some() {
            options.system_prompt = self.system_prompt.clone();
        }
        if self.max_turns.is_some() {
            options.max_turns = self.max_turns;
        }
        if self.max_budget_usd.is_some() {
            options.max_budget_usd = self.max_budget_usd;
        }
        if !self.allowed_tools.is_empty() {
            options.allowed_tools = self.allowed_tools.clone();
        }
        if self.permission_mode.is_some() {
            options.permission_mode = self.permission_mode;
        }
        options
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = Config::load()?;
    let store_path = args
        .store
        .clone()
        .or_else(|| config.store_path.clone())
        .or_else(JsonFileStore::default_path)
        .context("Could not determine a data directory, pass --store")?;
    let store: Arc<dyn EntityStore> = Arc::new(JsonFileStore::open(&store_path)?);
    let locator = CliLocator::new(config.cli_path.clone());

    match args.command {
        Command::New {
            directory,
            worktree,
            title,
        } => {
            let directory = project_directory(directory)?;
            let conversation = Conversation::create(store.clone(), locator, &title, &directory)?;
            if let Some(worktree) = worktree {
                store.set_worktree(conversation.id(), Some(canonical(&worktree)?.as_path()))?;
            }
            println!("{}", conversation.id());
        }
        Command::Send(send_args) => send(store, locator, &config, send_args).await?,
        Command::Fork { id } => {
            let fork = Conversation::open(store, locator, id)?.fork()?;
            println!("{}", fork.id());
        }
        Command::History { id } => history(&Conversation::open(store, locator, id)?)?,
        Command::List => list(store.as_ref())?,
    }

    Ok(())
}

async fn send(
    store: Arc<dyn EntityStore>,
    locator: CliLocator,
    config: &Config,
    args: SendArgs,
) -> Result<()> {
    let conversation = match args.conversation {
        Some(id) => Conversation::open(store, locator, id)?,
        None => {
            let directory = project_directory(args.directory.clone())?;
            let conversation =
                Conversation::create(store, locator, &title_for(&args.prompt), &directory)?;
            eprintln!("conversation {}", conversation.id());
            conversation
        }
    };

    let mut handle = conversation.send(&args.prompt, args.options(config)).await?;
    let mut stdout = std::io::stdout();
    let mut interrupted = false;

    loop {
        tokio::select! {
            update = handle.next_update() => match update {
                Some(TurnUpdate::TextDelta(text)) | Some(TurnUpdate::TextReplaced(text)) => {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                Some(TurnUpdate::ToolCallStarted { name, .. }) => eprintln!("\n[tool: {name}]"),
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                handle.cancel();
            }
        }
    }

    let outcome = handle.wait().await?;
    writeln!(stdout)?;

    if outcome.cancelled {
        eprintln!("Cancelled");
    }
    if let Some(result) = &outcome.result {
        tracing::info!(
            "Turn took {} ms over {} turns, ${:.4}",
            result.duration_ms,
            result.num_turns,
            result.total_cost_usd
        );
    }
    if let Some(error) = outcome.error {
        return Err(error.into());
    }
    Ok(())
}

fn history(conversation: &Conversation) -> Result<()> {
    let record = conversation.record()?;
    println!("# {} ({})", record.title, record.id);
    if let Some(session_id) = &record.session_id {
        println!("session {session_id}");
    }
    for stored in conversation.messages()? {
        let message = &stored.message;
        println!(
            "\n[{}] {}",
            message.role.as_str(),
            stored.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        if !message.content.is_empty() {
            println!("{}", message.content);
        }
        for tool in &message.tool_calls {
            println!("  tool {} {}", tool.tool_name, tool.input_json);
        }
    }
    Ok(())
}

fn list(store: &dyn EntityStore) -> Result<()> {
    for conversation in store.conversations()? {
        println!(
            "{}  {}  {}  {}",
            conversation.id,
            conversation.updated_at.format("%Y-%m-%d %H:%M"),
            conversation.session_id.as_deref().unwrap_or("-"),
            conversation.title
        );
    }
    Ok(())
}

fn project_directory(directory: Option<PathBuf>) -> Result<PathBuf> {
    let directory = match directory {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    canonical(&directory)
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("Directory not found: {}", path.display()))
}

/// Title for a conversation started from a prompt
fn title_for(prompt: &str) -> String {
    let line = prompt.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= TITLE_LEN {
        return line.to_string();
    }
    let mut title: String = line.chars().take(TITLE_LEN).collect();
    title.push_str("...");
    title
}
