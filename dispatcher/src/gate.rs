//! Human review gates driven by store polling.
//!
//! The dispatcher never receives approvals directly. Review actors edit the
//! task's status in the store, and the gate observes the edit on its next
//! poll. Silence past the timeout counts as rejection.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::io::store::load_tasks;
use crate::task::TaskStatus;

/// Which review the gate is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Plan review: `plan_review` resolves to `approved` or anything else.
    Plan,
    /// Push review: `push_review` resolves to `pushed` or anything else.
    Push,
}

impl Checkpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Push => "push",
        }
    }

    fn waiting_status(self) -> TaskStatus {
        match self {
            Self::Plan => TaskStatus::PlanReview,
            Self::Push => TaskStatus::PushReview,
        }
    }

    fn approved_status(self) -> TaskStatus {
        match self {
            Self::Plan => TaskStatus::Approved,
            Self::Push => TaskStatus::Pushed,
        }
    }
}

/// How a gate wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    /// The reviewer moved the task to any non-approved status.
    Rejected,
    TimedOut,
    /// The task disappeared from the store while waiting.
    Vanished,
    /// A stop request ended the wait early.
    Interrupted,
}

/// Poll cadence and patience for a gate wait.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub poll: Duration,
    pub timeout: Duration,
}

/// Block until the review for `task_id` resolves one way or another.
///
/// Store read errors propagate; a task that cannot be loaded is a store
/// problem, not a decision.
#[instrument(skip_all, fields(task_id, checkpoint = checkpoint.as_str()))]
pub fn wait_for_decision(
    schema_path: &Path,
    tasks_path: &Path,
    task_id: u64,
    checkpoint: Checkpoint,
    config: &GateConfig,
    stop: &AtomicBool,
) -> Result<Decision> {
    let deadline = Instant::now() + config.timeout;
    info!(timeout_secs = config.timeout.as_secs(), "awaiting review decision");

    loop {
        let file = load_tasks(schema_path, tasks_path)?;
        let Some(task) = file.get(task_id) else {
            info!("task vanished while awaiting review");
            return Ok(Decision::Vanished);
        };
        if task.status == checkpoint.approved_status() {
            info!("review approved");
            return Ok(Decision::Approved);
        }
        if task.status != checkpoint.waiting_status() {
            info!(status = task.status.as_str(), "review resolved against the task");
            return Ok(Decision::Rejected);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            info!("review timed out");
            return Ok(Decision::TimedOut);
        }
        if !sleep_with_stop(config.poll.min(remaining), stop) {
            debug!("stop requested while awaiting review");
            return Ok(Decision::Interrupted);
        }
    }
}

/// Sleep for `duration`, waking early on a stop request.
///
/// Returns false when the sleep ended because of the stop flag.
pub fn sleep_with_stop(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(Duration::from_secs(1)));
    }
}
