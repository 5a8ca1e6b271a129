//! Persisted task model for the dispatch queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states for a queued task.
///
/// The dispatcher owns transitions out of `pending`, `in_progress`, `approved`
/// and `executing`; review actors own transitions out of `plan_review` and
/// `push_review`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    PlanReview,
    Approved,
    Executing,
    PushReview,
    Decomposed,
    Done,
    Pushed,
    Failed,
}

impl TaskStatus {
    /// True for states the dispatcher never re-enters on its own.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Decomposed | Self::Done | Self::Pushed | Self::Failed
        )
    }

    /// True while a task occupies the single dispatch slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::InProgress
                | Self::PlanReview
                | Self::Approved
                | Self::Executing
                | Self::PushReview
        )
    }

    /// True for the two completed states counted against the daily cap.
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Done | Self::Pushed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::PlanReview => "plan_review",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::PushReview => "push_review",
            Self::Decomposed => "decomposed",
            Self::Done => "done",
            Self::Pushed => "pushed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "plan_review" => Ok(Self::PlanReview),
            "approved" => Ok(Self::Approved),
            "executing" => Ok(Self::Executing),
            "push_review" => Ok(Self::PushReview),
            "decomposed" => Ok(Self::Decomposed),
            "done" => Ok(Self::Done),
            "pushed" => Ok(Self::Pushed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Scheduling priority. Lower rank dispatches first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!(
                "unknown priority '{other}' (expected high, medium or low)"
            )),
        }
    }
}

/// One agent invocation against a task.
///
/// Appended for every attempt, including rate-limited and timed-out ones, so
/// the list length always equals the number of invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    /// Process exit code (`None` when the agent was killed by a signal).
    pub exit_code: Option<i32>,
    pub rate_limited: bool,
}

/// A unit of delegated work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub status: TaskStatus,
    pub prompt: String,
    #[serde(default)]
    pub priority: Priority,
    /// Id of the task this one was split out of, if any.
    #[serde(default)]
    pub parent: Option<u64>,
    /// Plan text awaiting (or having passed) human review.
    #[serde(default)]
    pub plan: Option<String>,
    /// Result summary, rejection feedback, or failure diagnostics.
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    /// When the most recent rate limit was observed for this task.
    #[serde(default)]
    pub rate_limited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a freshly submitted task in `pending`.
    pub fn new(
        id: u64,
        prompt: impl Into<String>,
        priority: Priority,
        parent: Option<u64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            prompt: prompt.into(),
            priority,
            parent,
            plan: None,
            summary: None,
            sessions: Vec::new(),
            rate_limited_at: None,
            created_at,
            completed_at: None,
        }
    }
}

/// The persisted queue (`.dispatch/tasks.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFile {
    pub tasks: Vec<Task>,
}

impl TaskFile {
    /// Highest id plus one (1 for an empty queue).
    pub fn next_id(&self) -> u64 {
        self.tasks.iter().map(|t| t.id).max().map_or(1, |id| id + 1)
    }

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Sort tasks by id for stable serialized output.
    pub fn sort_tasks(&mut self) {
        self.tasks.sort_by_key(|t| t.id);
    }
}
