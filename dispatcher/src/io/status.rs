//! Dispatcher status snapshot for external observers.
//!
//! Written on every state change so review tooling can show what the loop is
//! doing without attaching to the process. Advisory only, never read back for
//! decisions.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// An agent invocation or side effect is underway.
    Running,
    /// Waiting on a review decision, cooldown or poll interval.
    Sleeping,
    /// No loop is active.
    Idle,
}

impl DispatcherState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Idle => "idle",
        }
    }
}

/// Persisted snapshot (`.dispatch/status.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: DispatcherState,
    pub label: String,
    #[serde(default)]
    pub task_id: Option<u64>,
}

impl StatusSnapshot {
    pub fn idle() -> Self {
        Self {
            state: DispatcherState::Idle,
            label: "idle".to_string(),
            task_id: None,
        }
    }

    pub fn running(label: impl Into<String>, task_id: Option<u64>) -> Self {
        Self {
            state: DispatcherState::Running,
            label: label.into(),
            task_id,
        }
    }

    pub fn sleeping(label: impl Into<String>, task_id: Option<u64>) -> Self {
        Self {
            state: DispatcherState::Sleeping,
            label: label.into(),
            task_id,
        }
    }
}

/// Read the snapshot, treating a missing or garbled file as idle.
pub fn read_status(path: &Path) -> StatusSnapshot {
    let Ok(contents) = fs::read_to_string(path) else {
        return StatusSnapshot::idle();
    };
    match serde_json::from_str(&contents) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            debug!(err = %err, "unreadable status snapshot, reporting idle");
            StatusSnapshot::idle()
        }
    }
}

/// Atomically write the snapshot (temp file + rename).
pub fn write_status(path: &Path, snapshot: &StatusSnapshot) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("status path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(snapshot)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp status {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace status {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("status.json");
        let snapshot = StatusSnapshot::running("Executing task #3", Some(3));
        write_status(&path, &snapshot).expect("write");
        assert_eq!(read_status(&path), snapshot);
    }

    #[test]
    fn missing_or_garbled_status_reads_as_idle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("status.json");
        assert_eq!(read_status(&path), StatusSnapshot::idle());

        fs::write(&path, "not json").expect("write");
        assert_eq!(read_status(&path), StatusSnapshot::idle());
    }
}
