//! Append-only progress journal (`.dispatch/PROGRESS.md`).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::task::Task;

/// Append a journal entry for a completed task.
pub fn append_entry(path: &Path, task: &Task, at: DateTime<Utc>) -> Result<()> {
    let summary = task.summary.as_deref().unwrap_or("(no summary)").trim();
    let entry = format!(
        "\n## Task #{} — {}\n\n{}\n\n---\n",
        task.id,
        at.format("%Y-%m-%d %H:%M"),
        summary
    );
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open progress journal {}", path.display()))?;
    file.write_all(entry.as_bytes())
        .with_context(|| format!("append progress journal {}", path.display()))?;
    Ok(())
}
