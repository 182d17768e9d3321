/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/main.rs
 * Responsibility: Command-line front end: chat, one-shot ask, manifest and scheduled task management
 */

use devify::agent_loop::{ConversationOrchestrator, LoopEnd, LoopObserver, LoopOutcome};
use devify::approval::{ApprovalGate, AutoApprove, DenyAll, TerminalApproval};
use devify::config::{ApprovalMode, Config};
use devify::context::load_system_prompt;
use devify::executor::ToolExecutor;
use devify::guard::CommandGuard;
use devify::init;
use devify::llm::{AnthropicProvider, ProviderError, Usage};
use devify::manifest::ProjectManifest;
use devify::scheduler::{self, StepAction, TaskRun, TaskStep, TaskStore, TaskUpdate};
use devify::services::{HttpConnector, HttpSearchProvider, LocalFileService, ShellCommandRunner};
use devify::session::ChatSession;
use devify::task_runner::TaskRunner;
use devify::tools::{ToolCall, ToolResult};

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Devify - agentic coding assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Devify home directory (default: $DEVIFY_HOME or ~/.devify)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Project directory the assistant works in (default: current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Chat without a project; the assistant cannot use tools
    #[arg(long, global = true)]
    no_project: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Send one prompt, print the answer and exit
    Ask {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// Rebuild and print the project manifest
    Manifest,
    /// Manage scheduled tasks
    Tasks {
        #[command(subcommand)]
        action: TaskCommand,
    },
    /// Run enabled scheduled tasks on their cron schedules until interrupted
    Scheduler,
    /// List models available to the configured key
    Models,
}

#[derive(clap::Subcommand, Debug)]
enum TaskCommand {
    List,
    Delete { id: String },
    Toggle { id: String },
    /// Run a task immediately and record the result
    Run { id: String },
    /// Show a task's recent runs
    History { id: String },
    /// Change a task's fields
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Human-readable schedule, e.g. "Every Monday at 8:00"
        #[arg(long)]
        schedule: Option<String>,
        /// 5- or 6-field cron expression
        #[arg(long)]
        cron: Option<String>,
        #[arg(long)]
        project: Option<PathBuf>,
        /// Replaces all steps with these shell commands, in order
        #[arg(long = "command")]
        commands: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devify=info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Cli::parse();
    let home = init::resolve_home(args.home.clone());
    init::initialize_home(&home)?;
    let config = Config::load(init::config_path(&home))?;
    let store = Arc::new(TaskStore::open(&home)?);

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Manifest => {
            let root = project_root(args.project)?;
            let manifest = ProjectManifest::generate(&root, &LocalFileService).await?;
            manifest.save(&root).await?;
            println!("{}", manifest.summary(usize::MAX));
        }
        Commands::Tasks { action } => manage_tasks(&store, &task_runner(&config), action).await?,
        Commands::Scheduler => {
            let runner = Arc::new(task_runner(&config));
            let mut sched = scheduler::run_scheduler(store, runner).await?;
            info!("Scheduler running. Press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
            sched.shutdown().await?;
        }
        Commands::Models => {
            let provider = provider(&config, &home)?;
            for model in provider.list_models().await? {
                println!("{}", model);
            }
        }
        Commands::Ask { prompt } => {
            let root = if args.no_project { None } else { Some(project_root(args.project)?) };
            let mut session = build_session(&config, &home, root, store).await?;
            let cancel = CancellationToken::new();
            let watcher = watch_ctrl_c(cancel.clone());
            let result = session.send(&prompt.join(" "), &cancel, &mut TerminalObserver).await;
            watcher.abort();
            report(result, session.usage());
        }
        Commands::Chat => {
            if !atty::is(atty::Stream::Stdin) {
                bail!("`devify chat` needs an interactive terminal; use `devify ask` for piped input");
            }
            let root = if args.no_project { None } else { Some(project_root(args.project)?) };
            let session = build_session(&config, &home, root, store).await?;
            chat(session).await?;
        }
    }
    Ok(())
}

fn task_runner(config: &Config) -> TaskRunner {
    TaskRunner::new(
        CommandGuard::default(),
        Arc::new(ShellCommandRunner::new(config.command_timeout())),
    )
}

fn project_root(project: Option<PathBuf>) -> Result<PathBuf> {
    let root = match project {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    root.canonicalize()
        .with_context(|| format!("Project directory {} does not exist", root.display()))
}

fn provider(config: &Config, home: &Path) -> Result<AnthropicProvider> {
    if !config.has_api_key() {
        bail!(
            "No API key configured. Set ANTHROPIC_API_KEY or provider.api_key in {}",
            init::config_path(home).display()
        );
    }
    Ok(AnthropicProvider::new(
        &config.provider.api_key,
        &config.provider.model,
        &config.provider.base_url,
    ))
}

async fn build_session(
    config: &Config,
    home: &Path,
    root: Option<PathBuf>,
    store: Arc<TaskStore>,
) -> Result<ChatSession> {
    let provider = Arc::new(provider(config, home)?);
    info!(model = %provider.model(), "Using model");
    let orchestrator = ConversationOrchestrator::new(provider, config.loop_settings());
    let session = ChatSession::new(orchestrator, load_system_prompt(home, root.as_deref()));

    let Some(root) = root else {
        return Ok(session);
    };
    let manifest = ProjectManifest::open(&root, &LocalFileService).await?;
    let approval: Arc<dyn ApprovalGate> = match config.approval {
        ApprovalMode::Auto => Arc::new(AutoApprove),
        ApprovalMode::Prompt if atty::is(atty::Stream::Stdin) => Arc::new(TerminalApproval),
        ApprovalMode::Prompt => {
            warn!("stdin is not a terminal; file changes will be rejected. Set `approval: auto` to allow them");
            Arc::new(DenyAll)
        }
    };
    let mut executor = ToolExecutor::new(&root)
        .with_commands(Arc::new(ShellCommandRunner::new(config.command_timeout())))
        .with_limiter(Arc::new(config.rate_limiter()))
        .with_limits(config.executor_limits())
        .with_approval(approval)
        .with_scheduler(store)
        .with_manifest(manifest);
    if let Some(search) = &config.search {
        executor = executor.with_search(Arc::new(HttpSearchProvider::new(&search.endpoint, search.api_key.clone())));
    }
    if let Some(connector) = &config.connector {
        executor = executor.with_connector(Arc::new(HttpConnector::new(&connector.endpoint, connector.api_key.clone())));
    }
    info!(project = %root.display(), "Project opened");
    Ok(session.with_project(executor))
}

async fn chat(mut session: ChatSession) -> Result<()> {
    println!("Devify chat. /continue resumes after the iteration limit, /exit quits, Ctrl-C stops a reply.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            _ => {}
        }

        let cancel = CancellationToken::new();
        let watcher = watch_ctrl_c(cancel.clone());
        let result = if line == "/continue" {
            if !session.can_resume() {
                println!("Nothing to continue.");
                watcher.abort();
                continue;
            }
            session.resume(&cancel, &mut TerminalObserver).await
        } else {
            session.send(line, &cancel, &mut TerminalObserver).await
        };
        watcher.abort();
        report(result, session.usage());
    }
    Ok(())
}

fn watch_ctrl_c(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    })
}

fn report(result: Result<LoopOutcome, ProviderError>, total: Usage) {
    match result {
        Ok(outcome) => {
            println!();
            match outcome.end {
                LoopEnd::Done => {}
                LoopEnd::Cancelled => eprintln!("[stopped]"),
                LoopEnd::IterationCapReached => eprintln!(
                    "[reached the limit of {} tool rounds; type /continue to keep going]",
                    outcome.iterations
                ),
                LoopEnd::NoProject => eprintln!("[the assistant asked for tools, but no project is open]"),
            }
            eprintln!(
                "[tokens: {} in / {} out this turn, {} total]",
                outcome.usage.input_tokens,
                outcome.usage.output_tokens,
                total.total()
            );
        }
        Err(e) => {
            warn!("Model call failed: {}", e);
            eprintln!("Error: {}", e);
            eprintln!("[tokens: {} total]", total.total());
        }
    }
}

async fn manage_tasks(store: &TaskStore, runner: &TaskRunner, action: TaskCommand) -> Result<()> {
    match action {
        TaskCommand::List => {
            let tasks = store.list()?;
            if tasks.is_empty() {
                println!("No scheduled tasks.");
            }
            for task in tasks {
                let last = task
                    .last_run
                    .as_ref()
                    .map(|run| format!("{:?}", run.status))
                    .unwrap_or_else(|| "never run".to_string());
                println!(
                    "{}  {}  [{}]  {}  {}  next: {}",
                    task.id,
                    task.name,
                    task.cron_expression,
                    if task.enabled { "enabled" } else { "disabled" },
                    last,
                    task.next_run.as_deref().unwrap_or("-")
                );
            }
        }
        TaskCommand::Delete { id } => {
            store.delete(&id)?;
            println!("Deleted {}", id);
        }
        TaskCommand::Toggle { id } => {
            let task = store.toggle(&id)?;
            println!("{} is now {}", task.name, if task.enabled { "enabled" } else { "disabled" });
        }
        TaskCommand::Run { id } => {
            let task = store.get(&id)?;
            match scheduler::run_and_record(store, runner, &task).await? {
                Some(run) => print_run(&run),
                None => println!("{} is already running", task.name),
            }
        }
        TaskCommand::History { id } => {
            let task = store.get(&id)?;
            let runs = store.history(&id)?;
            if runs.is_empty() {
                println!("{} has not run yet.", task.name);
            }
            for run in runs.iter().rev() {
                print_run(run);
            }
        }
        TaskCommand::Update {
            id,
            name,
            description,
            schedule,
            cron,
            project,
            commands,
        } => {
            let project_path = project.map(|path| project_root(Some(path))).transpose()?;
            let steps = (!commands.is_empty()).then(|| {
                commands
                    .iter()
                    .map(|command| {
                        TaskStep::new(
                            command.clone(),
                            StepAction::RunCommand {
                                command: command.clone(),
                                cwd: None,
                            },
                        )
                    })
                    .collect()
            });
            let task = store.update(
                &id,
                TaskUpdate {
                    name,
                    description,
                    schedule,
                    cron_expression: cron,
                    project_path: project_path.map(|path| path.display().to_string()),
                    steps,
                    on_failure: None,
                },
            )?;
            println!("Updated {} [{}]", task.name, task.cron_expression);
        }
    }
    Ok(())
}

fn print_run(run: &TaskRun) {
    println!(
        "{}  {:?}  finished: {}",
        run.started_at,
        run.status,
        run.finished_at.as_deref().unwrap_or("-")
    );
    for step in &run.step_results {
        let detail = step.error.as_deref().or(step.output.as_deref()).unwrap_or("");
        println!("  {:?}  {}  {}", step.status, step.step_id, detail.lines().next().unwrap_or(""));
    }
}

/// Streams reply text to stdout and tool activity to stderr.
struct TerminalObserver;

impl LoopObserver for TerminalObserver {
    fn on_text(&mut self, delta: &str) {
        print!("{}", delta);
        let _ = std::io::stdout().flush();
    }

    fn on_tool_start(&mut self, call: &ToolCall) {
        eprintln!("\n> {}", call.name);
    }

    fn on_tool_result(&mut self, result: &ToolResult) {
        eprintln!("{}", result.synopsis());
    }
}
