//! Autonomous task dispatcher CLI.
//!
//! Manages a durable task queue (`.dispatch/tasks.json`) and runs a dispatch
//! loop that delegates each task to an agent CLI in two reviewed phases:
//! plan, then execute. Subcommands cover queue management, the two review
//! gates, the loop itself and a daily report.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};

use dispatcher::core::forest;
use dispatcher::digest::Digest;
use dispatcher::exit_codes;
use dispatcher::gate::GateConfig;
use dispatcher::io::agent::CliRunner;
use dispatcher::io::config::load_config;
use dispatcher::io::git::Git;
use dispatcher::io::init::{DispatchPaths, InitOptions, init_dispatch};
use dispatcher::io::prompt::PromptBuilder;
use dispatcher::io::status::read_status;
use dispatcher::io::store::{load_tasks, update_task, write_tasks};
use dispatcher::logging;
use dispatcher::looping::{LoopOptions, run_loop};
use dispatcher::step::{Fate, StepContext, run_step};
use dispatcher::task::{Priority, Task, TaskStatus};

#[derive(Parser)]
#[command(
    name = "dispatcher",
    version,
    about = "Autonomous task dispatcher with human review gates"
)]
struct Cli {
    /// Project root containing the `.dispatch` directory.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the `.dispatch` directory with store, schema and config.
    Init {
        /// Overwrite an existing `.dispatch` directory.
        #[arg(short, long)]
        force: bool,
    },
    /// Queue a new task.
    Add {
        /// What the agent should do.
        prompt: String,
        /// high, medium or low.
        #[arg(long, default_value = "medium")]
        priority: Priority,
        /// Parent task id, for manually decomposed work.
        #[arg(long)]
        parent: Option<u64>,
    },
    /// List tasks, optionally filtered by status.
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Print one task in full, including its session history.
    Show { id: u64 },
    /// Approve a plan waiting for review.
    Approve { id: u64 },
    /// Reject a plan waiting for review.
    Reject {
        id: u64,
        /// Reason recorded on the task.
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Approve pushing a completed task.
    ApprovePush { id: u64 },
    /// Keep a completed task local instead of pushing.
    RejectPush { id: u64 },
    /// Cancel a task the dispatcher is working on.
    Cancel { id: u64 },
    /// Requeue a finished task from scratch.
    Retry { id: u64 },
    /// Edit the prompt or priority of a task that is not running.
    Edit {
        id: u64,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
    },
    /// Remove a task that has no children.
    Delete { id: u64 },
    /// Run a single dispatch cycle.
    Step,
    /// Run the dispatch loop until stopped.
    Run {
        /// Stop after this many cycles.
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Print the daily report.
    Digest {
        /// Day to report on (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show what the dispatcher is doing right now.
    Status,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let paths = DispatchPaths::new(&cli.root);
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Add {
            prompt,
            priority,
            parent,
        } => cmd_add(&paths, &prompt, priority, parent),
        Command::List { status } => cmd_list(&paths, status),
        Command::Show { id } => cmd_show(&paths, id),
        Command::Approve { id } => cmd_approve(&paths, id),
        Command::Reject { id, feedback } => cmd_reject(&paths, id, feedback.as_deref()),
        Command::ApprovePush { id } => cmd_approve_push(&paths, id),
        Command::RejectPush { id } => cmd_reject_push(&paths, id),
        Command::Cancel { id } => cmd_cancel(&paths, id),
        Command::Retry { id } => cmd_retry(&paths, id),
        Command::Edit {
            id,
            prompt,
            priority,
        } => cmd_edit(&paths, id, prompt.as_deref(), priority),
        Command::Delete { id } => cmd_delete(&paths, id),
        Command::Step => cmd_step(&paths),
        Command::Run { cycles } => cmd_run(&paths, cycles),
        Command::Digest { date } => cmd_digest(&paths, date),
        Command::Status => cmd_status(&paths),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_dispatch(root, &InitOptions { force })?;
    println!("initialized {}", paths.dispatch_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_add(
    paths: &DispatchPaths,
    prompt: &str,
    priority: Priority,
    parent: Option<u64>,
) -> Result<i32> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        bail!("task prompt is empty");
    }
    let mut file = load_tasks(&paths.schema_path, &paths.tasks_path)?;
    if let Some(parent_id) = parent
        && file.get(parent_id).is_none()
    {
        bail!("parent task #{parent_id} does not exist");
    }
    let id = file.next_id();
    file.tasks
        .push(Task::new(id, prompt, priority, parent, Utc::now()));
    write_tasks(&paths.tasks_path, &file)?;
    println!("queued task #{id}");
    Ok(exit_codes::OK)
}

fn cmd_list(paths: &DispatchPaths, status: Option<TaskStatus>) -> Result<i32> {
    let file = load_tasks(&paths.schema_path, &paths.tasks_path)?;
    let mut shown = 0;
    for task in &file.tasks {
        if let Some(wanted) = status
            && task.status != wanted
        {
            continue;
        }
        let first_line = task.prompt.lines().next().unwrap_or("");
        println!(
            "#{:<4} {:<12} {:<7} {}",
            task.id,
            task.status.as_str(),
            task.priority.as_str(),
            excerpt(first_line, 60)
        );
        shown += 1;
    }
    if shown == 0 {
        println!("(no tasks)");
    }
    Ok(exit_codes::OK)
}

fn cmd_show(paths: &DispatchPaths, id: u64) -> Result<i32> {
    let file = load_tasks(&paths.schema_path, &paths.tasks_path)?;
    let task = file
        .get(id)
        .with_context(|| format!("task #{id} not found"))?;
    println!("id:       {}", task.id);
    println!("status:   {}", task.status.as_str());
    println!("priority: {}", task.priority.as_str());
    if let Some(parent) = task.parent {
        println!("parent:   #{parent}");
    }
    println!("created:  {}", task.created_at.to_rfc3339());
    if let Some(at) = task.completed_at {
        println!("completed: {}", at.to_rfc3339());
    }
    if let Some(at) = task.rate_limited_at {
        println!("rate limited: {}", at.to_rfc3339());
    }
    println!("prompt:\n{}", indent(task.prompt.trim()));
    if let Some(plan) = task.plan.as_deref() {
        println!("plan:\n{}", indent(plan.trim()));
    }
    if let Some(summary) = task.summary.as_deref() {
        println!("summary:\n{}", indent(summary.trim()));
    }
    if !task.sessions.is_empty() {
        println!("sessions:");
        for (index, session) in task.sessions.iter().enumerate() {
            println!(
                "  {}. {} ({}s, exit {}{})",
                index + 1,
                session.started_at.format("%Y-%m-%d %H:%M"),
                session.duration_secs,
                session
                    .exit_code
                    .map_or("none".to_string(), |code| code.to_string()),
                if session.rate_limited {
                    ", rate limited"
                } else {
                    ""
                }
            );
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_approve(paths: &DispatchPaths, id: u64) -> Result<i32> {
    transition(paths, id, &[TaskStatus::PlanReview], "approve", |t| {
        t.status = TaskStatus::Approved;
    })?;
    println!("approved plan for task #{id}");
    Ok(exit_codes::OK)
}

fn cmd_reject(paths: &DispatchPaths, id: u64, feedback: Option<&str>) -> Result<i32> {
    let summary = match feedback {
        Some(text) => format!("Plan rejected: {text}"),
        None => "Plan rejected".to_string(),
    };
    transition(paths, id, &[TaskStatus::PlanReview], "reject", |t| {
        t.status = TaskStatus::Failed;
        t.summary = Some(summary);
    })?;
    println!("rejected plan for task #{id}");
    Ok(exit_codes::OK)
}

fn cmd_approve_push(paths: &DispatchPaths, id: u64) -> Result<i32> {
    transition(paths, id, &[TaskStatus::PushReview], "approve push for", |t| {
        t.status = TaskStatus::Pushed;
        if t.completed_at.is_none() {
            t.completed_at = Some(Utc::now());
        }
    })?;
    println!("approved push for task #{id}");
    Ok(exit_codes::OK)
}

fn cmd_reject_push(paths: &DispatchPaths, id: u64) -> Result<i32> {
    transition(paths, id, &[TaskStatus::PushReview], "reject push for", |t| {
        t.status = TaskStatus::Done;
        if t.completed_at.is_none() {
            t.completed_at = Some(Utc::now());
        }
    })?;
    println!("task #{id} kept local");
    Ok(exit_codes::OK)
}

fn cmd_cancel(paths: &DispatchPaths, id: u64) -> Result<i32> {
    let active = [
        TaskStatus::InProgress,
        TaskStatus::PlanReview,
        TaskStatus::Approved,
        TaskStatus::Executing,
    ];
    transition(paths, id, &active, "cancel", |t| {
        t.status = TaskStatus::Failed;
        t.summary = Some("Cancelled by operator".to_string());
    })?;
    println!("cancelled task #{id}");
    Ok(exit_codes::OK)
}

fn cmd_retry(paths: &DispatchPaths, id: u64) -> Result<i32> {
    let finished = [TaskStatus::Failed, TaskStatus::Done, TaskStatus::Pushed];
    transition(paths, id, &finished, "retry", |t| {
        t.status = TaskStatus::Pending;
        t.plan = None;
        t.summary = None;
        t.completed_at = None;
        t.rate_limited_at = None;
    })?;
    println!("requeued task #{id}");
    Ok(exit_codes::OK)
}

fn cmd_edit(
    paths: &DispatchPaths,
    id: u64,
    prompt: Option<&str>,
    priority: Option<Priority>,
) -> Result<i32> {
    if prompt.is_none() && priority.is_none() {
        bail!("nothing to edit (pass --prompt or --priority)");
    }
    if let Some(text) = prompt
        && text.trim().is_empty()
    {
        bail!("task prompt is empty");
    }
    let editable = [TaskStatus::Pending, TaskStatus::Failed];
    transition(paths, id, &editable, "edit", |t| {
        if let Some(text) = prompt {
            t.prompt = text.trim().to_string();
        }
        if let Some(p) = priority {
            t.priority = p;
        }
    })?;
    println!("updated task #{id}");
    Ok(exit_codes::OK)
}

fn cmd_delete(paths: &DispatchPaths, id: u64) -> Result<i32> {
    let mut file = load_tasks(&paths.schema_path, &paths.tasks_path)?;
    let task = file
        .get(id)
        .with_context(|| format!("task #{id} not found"))?;
    if matches!(task.status, TaskStatus::InProgress | TaskStatus::Executing) {
        bail!("cannot delete task #{id} while an invocation is running (cancel it first)");
    }
    if !forest::children_of(&file.tasks, id).is_empty() {
        bail!("cannot delete task #{id}: other tasks reference it as parent");
    }
    file.tasks.retain(|t| t.id != id);
    write_tasks(&paths.tasks_path, &file)?;
    println!("deleted task #{id}");
    Ok(exit_codes::OK)
}

fn cmd_step(paths: &DispatchPaths) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let runner = CliRunner::new(config.agent.command.clone())?;
    let vcs = Git::new(&paths.root);
    let prompts = PromptBuilder::new();
    let gate = GateConfig {
        poll: config.approval_poll(),
        timeout: config.approval_timeout(),
    };
    let stop = AtomicBool::new(false);
    let ctx = StepContext {
        paths,
        runner: &runner,
        vcs: &vcs,
        config: &config,
        gate: &gate,
        prompts: &prompts,
        stop: &stop,
    };

    let outcome = run_step(&ctx)?;
    match outcome.fate {
        Fate::Idle => {
            println!("queue empty");
            Ok(exit_codes::IDLE)
        }
        Fate::Capped => {
            println!("daily task limit reached");
            Ok(exit_codes::CAPPED)
        }
        fate => {
            let id = outcome
                .task_id
                .map_or("?".to_string(), |id| format!("#{id}"));
            println!("task {id}: {}", fate.as_str());
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(paths: &DispatchPaths, cycles: Option<u64>) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let runner = CliRunner::new(config.agent.command.clone())?;
    let vcs = Git::new(&paths.root);
    let stop = AtomicBool::new(false);

    let outcome = run_loop(
        paths,
        &runner,
        &vcs,
        &config,
        &LoopOptions { max_cycles: cycles },
        &stop,
        |step| {
            if let Some(id) = step.task_id {
                println!("task #{id}: {}", step.fate.as_str());
            }
        },
    )?;
    println!("stopped after {} cycles", outcome.cycles);
    Ok(exit_codes::OK)
}

fn cmd_digest(paths: &DispatchPaths, date: Option<NaiveDate>) -> Result<i32> {
    let file = load_tasks(&paths.schema_path, &paths.tasks_path)?;
    let day = date.unwrap_or_else(|| Utc::now().date_naive());
    let digest = Digest::build(&file.tasks, day);
    println!("{}", digest.subject());
    println!();
    print!("{}", digest.render());
    Ok(exit_codes::OK)
}

fn cmd_status(paths: &DispatchPaths) -> Result<i32> {
    let snapshot = read_status(&paths.status_path);
    match snapshot.task_id {
        Some(id) => println!(
            "{}: {} (task #{id})",
            snapshot.state.as_str(),
            snapshot.label
        ),
        None => println!("{}: {}", snapshot.state.as_str(), snapshot.label),
    }
    Ok(exit_codes::OK)
}

/// Apply a guarded status transition to one task.
fn transition(
    paths: &DispatchPaths,
    id: u64,
    allowed: &[TaskStatus],
    describe: &str,
    mutate: impl FnOnce(&mut Task),
) -> Result<()> {
    let file = load_tasks(&paths.schema_path, &paths.tasks_path)?;
    let task = file
        .get(id)
        .with_context(|| format!("task #{id} not found"))?;
    if !allowed.contains(&task.status) {
        bail!(
            "cannot {describe} task #{id} in status {}",
            task.status.as_str()
        );
    }
    update_task(&paths.schema_path, &paths.tasks_path, id, mutate)?;
    Ok(())
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
