//! Read-only daily report over the task store.

use chrono::NaiveDate;

use crate::task::{Task, TaskStatus};

/// One day of queue activity, bucketed for reporting.
///
/// Pending tasks are the standing queue, not just the day's arrivals. Failed
/// tasks without a completion timestamp count under the day they were created.
#[derive(Debug, Clone)]
pub struct Digest {
    pub day: NaiveDate,
    pub done: Vec<Task>,
    pub pending: Vec<Task>,
    pub failed: Vec<Task>,
}

impl Digest {
    pub fn build(tasks: &[Task], day: NaiveDate) -> Self {
        let done = tasks
            .iter()
            .filter(|t| {
                t.status.is_completed() && t.completed_at.is_some_and(|at| at.date_naive() == day)
            })
            .cloned()
            .collect();
        let pending = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        let failed = tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Failed
                    && t.completed_at.unwrap_or(t.created_at).date_naive() == day
            })
            .cloned()
            .collect();
        Self {
            day,
            done,
            pending,
            failed,
        }
    }

    pub fn subject(&self) -> String {
        format!(
            "Agent Daily Report — {} done, {} pending [{}]",
            self.done.len(),
            self.pending.len(),
            self.day
        )
    }

    /// Plain text body, one section per bucket.
    pub fn render(&self) -> String {
        let mut out = String::new();
        push_section(
            &mut out,
            &format!("✓ Completed ({}):", self.done.len()),
            &self.done,
            |task| format!("  #{} — {}", task.id, excerpt(&task.prompt, 70)),
        );
        out.push('\n');
        push_section(
            &mut out,
            &format!("⏳ Pending ({}):", self.pending.len()),
            &self.pending,
            |task| format!("  #{} — {}", task.id, excerpt(&task.prompt, 70)),
        );
        out.push('\n');
        push_section(
            &mut out,
            &format!("✗ Failed ({}):", self.failed.len()),
            &self.failed,
            |task| {
                // Only the first summary line; failure summaries carry
                // multi-line output tails that would wreck the report.
                let note = task
                    .summary
                    .as_deref()
                    .and_then(|s| s.lines().next())
                    .filter(|line| !line.trim().is_empty());
                match note {
                    Some(note) => {
                        format!("  #{} — {} ({note})", task.id, excerpt(&task.prompt, 60))
                    }
                    None => format!("  #{} — {}", task.id, excerpt(&task.prompt, 60)),
                }
            },
        );
        out
    }
}

fn push_section(out: &mut String, header: &str, tasks: &[Task], line: impl Fn(&Task) -> String) {
    out.push_str(header);
    out.push('\n');
    if tasks.is_empty() {
        out.push_str("  (none)\n");
        return;
    }
    for task in tasks {
        out.push_str(&line(task));
        out.push('\n');
    }
}

fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
