//! Orchestration for a single dispatch cycle.
//!
//! One cycle takes at most one task through as much of its lifecycle as the
//! outside world allows: claim, plan, plan review, execute, push review. The
//! store is reloaded after every wait and every invocation, and any edit made
//! by someone else wins over the dispatcher's in-memory view.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::core::classifier::Verdict;
use crate::core::selector::{active_task, pick_next};
use crate::core::{forest, quota};
use crate::gate::{Checkpoint, Decision, GateConfig, wait_for_decision};
use crate::io::agent::{AgentRequest, AgentRunner, Mode};
use crate::io::config::DispatcherConfig;
use crate::io::git::{Vcs, commit_message};
use crate::io::init::DispatchPaths;
use crate::io::progress;
use crate::io::prompt::PromptBuilder;
use crate::io::status::{StatusSnapshot, write_status};
use crate::io::store::{load_tasks, update_task};
use crate::session::run_session;
use crate::task::{Task, TaskStatus};

/// The cycle could not read the task store at all.
///
/// Attached to the top-of-cycle load error so the loop can recover it with
/// `downcast_ref` at its error boundary. Any other cycle error fails the
/// task being worked on; this one is the only class allowed to end the loop.
#[derive(Debug)]
pub struct StoreUnreadableError {
    pub path: PathBuf,
}

impl fmt::Display for StoreUnreadableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task store at {} cannot be read", self.path.display())
    }
}

impl std::error::Error for StoreUnreadableError {}

/// How a dispatch cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    /// Nothing pending.
    Idle,
    /// Daily completion cap reached.
    Capped,
    /// Completed and pushed.
    Pushed,
    /// Completed, commit kept local.
    Done,
    /// Split into child tasks.
    Decomposed,
    /// Requeued after a provider rate limit.
    RateLimited,
    Failed,
    /// The task vanished or was edited out from under the dispatcher.
    Abandoned,
    /// A stop request ended the cycle mid-wait.
    Interrupted,
}

impl Fate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capped => "capped",
            Self::Pushed => "pushed",
            Self::Done => "done",
            Self::Decomposed => "decomposed",
            Self::RateLimited => "rate_limited",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Result of a single dispatch cycle.
#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    /// Task the cycle worked on, if it got that far.
    pub task_id: Option<u64>,
    pub fate: Fate,
}

/// Everything a cycle needs, borrowed from the caller.
pub struct StepContext<'a, R, V> {
    pub paths: &'a DispatchPaths,
    pub runner: &'a R,
    pub vcs: &'a V,
    pub config: &'a DispatcherConfig,
    pub gate: &'a GateConfig,
    pub prompts: &'a PromptBuilder,
    pub stop: &'a AtomicBool,
}

/// Execute one dispatch cycle.
///
/// A task left active by a previous run is resumed (or failed, when the
/// interruption lost an invocation) before anything new is dispatched.
pub fn run_step<R: AgentRunner, V: Vcs>(ctx: &StepContext<'_, R, V>) -> Result<StepOutcome> {
    let file = load_tasks(&ctx.paths.schema_path, &ctx.paths.tasks_path).map_err(|err| {
        err.context(StoreUnreadableError {
            path: ctx.paths.tasks_path.clone(),
        })
    })?;

    if let Some(active) = active_task(&file.tasks) {
        let task_id = active.id;
        let status = active.status;
        warn!(task_id, status = status.as_str(), "found task left active, resuming");
        return resume_task(ctx, task_id, status);
    }

    let today = Utc::now().date_naive();
    let completed = quota::completed_on(&file.tasks, today);
    if completed >= ctx.config.daily_task_limit {
        info!(
            completed,
            limit = ctx.config.daily_task_limit,
            "daily task limit reached"
        );
        return Ok(StepOutcome {
            task_id: None,
            fate: Fate::Capped,
        });
    }

    let Some(next) = pick_next(&file.tasks) else {
        return Ok(StepOutcome {
            task_id: None,
            fate: Fate::Idle,
        });
    };
    let task = next.clone();
    info!(
        task_id = task.id,
        priority = task.priority.as_str(),
        "dispatching task"
    );
    run_plan_phase(ctx, &task)
}

/// Pick up a task that was mid-lifecycle when the process last stopped.
fn resume_task<R: AgentRunner, V: Vcs>(
    ctx: &StepContext<'_, R, V>,
    task_id: u64,
    status: TaskStatus,
) -> Result<StepOutcome> {
    match status {
        // An invocation was in flight and its output is gone with the old
        // process. The human decides whether to retry.
        TaskStatus::InProgress | TaskStatus::Executing => {
            fail_task(
                ctx,
                task_id,
                "Dispatcher restarted during an agent invocation",
                "",
            )?;
            settled(task_id, Fate::Failed)
        }
        TaskStatus::PlanReview => await_plan_decision(ctx, task_id),
        TaskStatus::Approved => run_execute_phase(ctx, task_id),
        TaskStatus::PushReview => await_push_decision(ctx, task_id),
        other => bail!("task {task_id} is not active (status {})", other.as_str()),
    }
}

fn run_plan_phase<R: AgentRunner, V: Vcs>(
    ctx: &StepContext<'_, R, V>,
    task: &Task,
) -> Result<StepOutcome> {
    let claimed = update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task.id, |t| {
        t.status = TaskStatus::InProgress;
    })?;
    if !claimed {
        return settled(task.id, Fate::Abandoned);
    }
    write_status(
        &ctx.paths.status_path,
        &StatusSnapshot::running(format!("Planning task #{}", task.id), Some(task.id)),
    )?;

    let prompt = ctx.prompts.plan(task)?;
    let request = AgentRequest {
        workdir: ctx.paths.root.clone(),
        prompt,
        mode: Mode::Plan,
        timeout: ctx.config.invocation_timeout(),
        output_limit_bytes: ctx.config.output_limit_bytes,
    };
    let session = run_session(
        ctx.runner,
        &request,
        &ctx.paths.schema_path,
        &ctx.paths.tasks_path,
        task.id,
        &ctx.config.rate_limit_markers,
    )?;

    let file = load_tasks(&ctx.paths.schema_path, &ctx.paths.tasks_path)?;
    let Some(current) = file.get(task.id) else {
        return settled(task.id, Fate::Abandoned);
    };
    if current.status != TaskStatus::InProgress {
        info!(
            task_id = task.id,
            status = current.status.as_str(),
            "task state changed during planning, discarding result"
        );
        return settled(task.id, Fate::Abandoned);
    }

    match session.verdict {
        Verdict::RateLimited => {
            requeue_rate_limited(ctx, task.id)?;
            settled(task.id, Fate::RateLimited)
        }
        Verdict::HardFailure { reason } => {
            fail_task(
                ctx,
                task.id,
                &format!("Planning failed: {reason}"),
                &session.invocation.output,
            )?;
            settled(task.id, Fate::Failed)
        }
        Verdict::Success { result } => {
            update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task.id, |t| {
                t.plan = Some(result);
                t.status = TaskStatus::PlanReview;
            })?;
            info!(task_id = task.id, "plan ready for review");
            await_plan_decision(ctx, task.id)
        }
    }
}

fn await_plan_decision<R: AgentRunner, V: Vcs>(
    ctx: &StepContext<'_, R, V>,
    task_id: u64,
) -> Result<StepOutcome> {
    write_status(
        &ctx.paths.status_path,
        &StatusSnapshot::sleeping(format!("Awaiting plan review for task #{task_id}"), Some(task_id)),
    )?;
    match wait_for_decision(
        &ctx.paths.schema_path,
        &ctx.paths.tasks_path,
        task_id,
        Checkpoint::Plan,
        ctx.gate,
        ctx.stop,
    )? {
        Decision::Approved => run_execute_phase(ctx, task_id),
        Decision::Rejected => {
            // The reviewer already wrote the resolution, including any
            // feedback in the summary. Leave it untouched.
            info!(task_id, "plan rejected by reviewer");
            settled(task_id, Fate::Failed)
        }
        Decision::TimedOut => {
            let timeout_secs = ctx.gate.timeout.as_secs();
            update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task_id, |t| {
                if t.status == TaskStatus::PlanReview {
                    t.status = TaskStatus::Failed;
                    t.summary = Some(format!("Plan approval timed out after {timeout_secs}s"));
                }
            })?;
            settled(task_id, Fate::Failed)
        }
        Decision::Vanished => settled(task_id, Fate::Abandoned),
        Decision::Interrupted => settled(task_id, Fate::Interrupted),
    }
}

fn run_execute_phase<R: AgentRunner, V: Vcs>(
    ctx: &StepContext<'_, R, V>,
    task_id: u64,
) -> Result<StepOutcome> {
    let file = load_tasks(&ctx.paths.schema_path, &ctx.paths.tasks_path)?;
    let Some(current) = file.get(task_id) else {
        return settled(task_id, Fate::Abandoned);
    };
    if current.status != TaskStatus::Approved {
        info!(
            task_id,
            status = current.status.as_str(),
            "task no longer approved, abandoning"
        );
        return settled(task_id, Fate::Abandoned);
    }
    let task = current.clone();
    let next_id = file.next_id();

    update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task_id, |t| {
        t.status = TaskStatus::Executing;
    })?;
    write_status(
        &ctx.paths.status_path,
        &StatusSnapshot::running(format!("Executing task #{task_id}"), Some(task_id)),
    )?;

    let tasks_path_text = ctx.paths.tasks_path.display().to_string();
    let prompt = ctx.prompts.execute(&task, &tasks_path_text, next_id)?;
    let request = AgentRequest {
        workdir: ctx.paths.root.clone(),
        prompt,
        mode: Mode::Execute,
        timeout: ctx.config.invocation_timeout(),
        output_limit_bytes: ctx.config.output_limit_bytes,
    };
    let session = run_session(
        ctx.runner,
        &request,
        &ctx.paths.schema_path,
        &ctx.paths.tasks_path,
        task_id,
        &ctx.config.rate_limit_markers,
    )?;

    let file = load_tasks(&ctx.paths.schema_path, &ctx.paths.tasks_path)?;
    let Some(current) = file.get(task_id) else {
        return settled(task_id, Fate::Abandoned);
    };
    match current.status {
        TaskStatus::Decomposed => {
            info!(task_id, "agent marked the task decomposed");
            return settled(task_id, Fate::Decomposed);
        }
        TaskStatus::Executing => {}
        other => {
            info!(
                task_id,
                status = other.as_str(),
                "task state changed during execution, discarding result"
            );
            return settled(task_id, Fate::Abandoned);
        }
    }
    if forest::has_pending_children(&file.tasks, task_id) {
        update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task_id, |t| {
            t.status = TaskStatus::Decomposed;
        })?;
        info!(task_id, "pending children detected, marking decomposed");
        return settled(task_id, Fate::Decomposed);
    }

    match session.verdict {
        Verdict::RateLimited => {
            requeue_rate_limited(ctx, task_id)?;
            settled(task_id, Fate::RateLimited)
        }
        Verdict::HardFailure { reason } => {
            fail_task(
                ctx,
                task_id,
                &format!("Execution failed: {reason}"),
                &session.invocation.output,
            )?;
            settled(task_id, Fate::Failed)
        }
        Verdict::Success { result } => {
            let summary = result.trim().to_string();
            let committed = ctx
                .vcs
                .commit_all(&commit_message(task_id, &task.prompt))
                .context("commit completed task")?;
            if !committed {
                warn!(task_id, "agent reported success but produced no changes");
            }
            update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task_id, |t| {
                t.summary = Some(summary);
                t.status = TaskStatus::PushReview;
            })?;
            info!(task_id, "result ready for push review");
            await_push_decision(ctx, task_id)
        }
    }
}

fn await_push_decision<R: AgentRunner, V: Vcs>(
    ctx: &StepContext<'_, R, V>,
    task_id: u64,
) -> Result<StepOutcome> {
    write_status(
        &ctx.paths.status_path,
        &StatusSnapshot::sleeping(format!("Awaiting push review for task #{task_id}"), Some(task_id)),
    )?;
    match wait_for_decision(
        &ctx.paths.schema_path,
        &ctx.paths.tasks_path,
        task_id,
        Checkpoint::Push,
        ctx.gate,
        ctx.stop,
    )? {
        Decision::Approved => {
            write_status(
                &ctx.paths.status_path,
                &StatusSnapshot::running(format!("Pushing task #{task_id}"), Some(task_id)),
            )?;
            if let Err(err) = ctx.vcs.push() {
                // The commit exists locally and the reviewer said yes; the
                // operator can push by hand once the remote recovers.
                warn!(task_id, err = %err, "push failed, commit kept local");
            }
            update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task_id, |t| {
                if t.completed_at.is_none() {
                    t.completed_at = Some(Utc::now());
                }
            })?;
            append_completion(ctx, task_id)?;
            settled(task_id, Fate::Pushed)
        }
        Decision::Rejected => {
            update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task_id, |t| {
                if t.status == TaskStatus::Done && t.completed_at.is_none() {
                    t.completed_at = Some(Utc::now());
                }
            })?;
            info!(task_id, "push declined, commit kept local");
            append_completion(ctx, task_id)?;
            settled(task_id, Fate::Done)
        }
        Decision::TimedOut => {
            let timeout_secs = ctx.gate.timeout.as_secs();
            update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task_id, |t| {
                if t.status == TaskStatus::PushReview {
                    t.status = TaskStatus::Done;
                    if t.completed_at.is_none() {
                        t.completed_at = Some(Utc::now());
                    }
                    let note =
                        format!("Push approval timed out after {timeout_secs}s; commit kept local");
                    t.summary = Some(match t.summary.take() {
                        Some(existing) => format!("{existing}\n\n{note}"),
                        None => note,
                    });
                }
            })?;
            append_completion(ctx, task_id)?;
            settled(task_id, Fate::Done)
        }
        Decision::Vanished => settled(task_id, Fate::Abandoned),
        Decision::Interrupted => settled(task_id, Fate::Interrupted),
    }
}

fn settled(task_id: u64, fate: Fate) -> Result<StepOutcome> {
    Ok(StepOutcome {
        task_id: Some(task_id),
        fate,
    })
}

fn fail_task<R: AgentRunner, V: Vcs>(
    ctx: &StepContext<'_, R, V>,
    task_id: u64,
    reason: &str,
    output: &str,
) -> Result<()> {
    let tail = tail_of(output, ctx.config.summary_tail_bytes);
    let summary = if tail.is_empty() {
        reason.to_string()
    } else {
        format!("{reason}\n\n{tail}")
    };
    update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task_id, |t| {
        t.status = TaskStatus::Failed;
        t.summary = Some(summary);
    })?;
    warn!(task_id, reason, "task failed");
    Ok(())
}

fn requeue_rate_limited<R: AgentRunner, V: Vcs>(
    ctx: &StepContext<'_, R, V>,
    task_id: u64,
) -> Result<()> {
    update_task(&ctx.paths.schema_path, &ctx.paths.tasks_path, task_id, |t| {
        if !t.status.is_terminal() {
            t.status = TaskStatus::Pending;
        }
    })?;
    info!(task_id, "task requeued after rate limit");
    Ok(())
}

/// Journal the task if it ended up completed.
fn append_completion<R: AgentRunner, V: Vcs>(
    ctx: &StepContext<'_, R, V>,
    task_id: u64,
) -> Result<()> {
    let file = load_tasks(&ctx.paths.schema_path, &ctx.paths.tasks_path)?;
    let Some(task) = file.get(task_id) else {
        return Ok(());
    };
    if !task.status.is_completed() {
        return Ok(());
    }
    progress::append_entry(&ctx.paths.progress_path, task, Utc::now())
}

/// Last `limit` bytes of `text`, kept on a char boundary.
fn tail_of(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= limit {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - limit;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].trim_start().to_string()
}
