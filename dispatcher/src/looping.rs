//! The long-running dispatch loop.
//!
//! Wraps [`run_step`] with pacing (idle poll, daily cap, rate limit cooldown),
//! stop handling and an error boundary that fails the task being worked on
//! rather than wedging the whole queue. Only a store that cannot be read
//! ends the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::core::selector::active_task;
use crate::gate::{GateConfig, sleep_with_stop};
use crate::io::agent::AgentRunner;
use crate::io::config::DispatcherConfig;
use crate::io::git::Vcs;
use crate::io::init::DispatchPaths;
use crate::io::prompt::PromptBuilder;
use crate::io::status::{StatusSnapshot, write_status};
use crate::io::store::{load_tasks, update_task};
use crate::step::{Fate, StepContext, StepOutcome, StoreUnreadableError, run_step};
use crate::task::TaskStatus;

/// Give up once this many consecutive cycles cannot read the store. A store
/// that cannot be read will not fix itself by polling.
const MAX_STORE_READ_FAILURES: u32 = 3;

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The stop flag was raised (signal, or the step callback).
    Requested,
    /// The configured cycle budget ran out.
    CyclesExhausted,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopOutcome {
    pub cycles: u64,
    pub stop: LoopStop,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopOptions {
    /// Stop after this many cycles. `None` runs until a stop request.
    pub max_cycles: Option<u64>,
}

/// Run dispatch cycles until stopped.
///
/// `on_step` observes every completed cycle; raising `stop` from inside it
/// ends the loop before the next cycle starts.
pub fn run_loop<R: AgentRunner, V: Vcs>(
    paths: &DispatchPaths,
    runner: &R,
    vcs: &V,
    config: &DispatcherConfig,
    options: &LoopOptions,
    stop: &AtomicBool,
    mut on_step: impl FnMut(&StepOutcome),
) -> Result<LoopOutcome> {
    let prompts = PromptBuilder::new();
    let gate = GateConfig {
        poll: config.approval_poll(),
        timeout: config.approval_timeout(),
    };
    let ctx = StepContext {
        paths,
        runner,
        vcs,
        config,
        gate: &gate,
        prompts: &prompts,
        stop,
    };

    let mut cycles: u64 = 0;
    let mut store_read_failures: u32 = 0;
    loop {
        if stop.load(Ordering::Relaxed) {
            write_status(&paths.status_path, &StatusSnapshot::idle())?;
            return Ok(LoopOutcome {
                cycles,
                stop: LoopStop::Requested,
            });
        }

        let pause: Option<(&str, Duration)> = match run_step(&ctx) {
            Ok(outcome) => {
                store_read_failures = 0;
                cycles += 1;
                on_step(&outcome);
                if outcome.fate == Fate::RateLimited {
                    info!(
                        cooldown_secs = config.cooldown_secs,
                        "entering rate limit cooldown"
                    );
                }
                pause_after(outcome.fate, config)
            }
            Err(err) => {
                if err.downcast_ref::<StoreUnreadableError>().is_some() {
                    store_read_failures += 1;
                    error!(store_read_failures, "dispatch cycle failed: {err:#}");
                    if store_read_failures >= MAX_STORE_READ_FAILURES {
                        return Err(err.context("task store unreadable across consecutive cycles"));
                    }
                } else {
                    store_read_failures = 0;
                    error!("dispatch cycle failed: {err:#}");
                    fail_active_task(paths, &err);
                }
                cycles += 1;
                Some(("Recovering from a dispatch error", config.poll_interval()))
            }
        };

        if let Some(max) = options.max_cycles
            && cycles >= max
        {
            write_status(&paths.status_path, &StatusSnapshot::idle())?;
            return Ok(LoopOutcome {
                cycles,
                stop: LoopStop::CyclesExhausted,
            });
        }

        if let Some((label, duration)) = pause {
            write_status(&paths.status_path, &StatusSnapshot::sleeping(label, None))?;
            if !sleep_with_stop(duration, stop) {
                write_status(&paths.status_path, &StatusSnapshot::idle())?;
                return Ok(LoopOutcome {
                    cycles,
                    stop: LoopStop::Requested,
                });
            }
        }
    }
}

/// Pause before the next cycle for fates that should not redispatch at once.
///
/// A rate limit gets the long cooldown; an idle or capped queue gets the
/// short poll interval.
fn pause_after(fate: Fate, config: &DispatcherConfig) -> Option<(&'static str, Duration)> {
    match fate {
        Fate::Idle => Some(("Queue empty", config.poll_interval())),
        Fate::Capped => Some(("Daily task limit reached", config.poll_interval())),
        Fate::RateLimited => Some(("Cooling down after rate limit", config.cooldown())),
        _ => None,
    }
}

/// Fail whichever task is active so a bad cycle cannot hold the queue.
///
/// Best effort: if the store itself cannot be read, the next cycle's own
/// store read trips the fatal bound anyway.
fn fail_active_task(paths: &DispatchPaths, err: &anyhow::Error) {
    let Ok(file) = load_tasks(&paths.schema_path, &paths.tasks_path) else {
        return;
    };
    let Some(active) = active_task(&file.tasks) else {
        return;
    };
    let task_id = active.id;
    let summary = format!("Dispatcher error: {err:#}");
    match update_task(&paths.schema_path, &paths.tasks_path, task_id, |t| {
        t.status = TaskStatus::Failed;
        t.summary = Some(summary);
    }) {
        Ok(_) => warn!(task_id, "failed active task after dispatch error"),
        Err(write_err) => warn!(task_id, "could not fail active task: {write_err:#}"),
    }
}
