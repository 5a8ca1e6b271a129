//! Git adapter for dispatch side effects.
//!
//! Completed work is committed and pushed through a small, explicit wrapper
//! around `git` subprocess calls. The [`Vcs`] trait keeps orchestration
//! testable without a real repository.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Version-control side effects the dispatcher performs after execution.
pub trait Vcs {
    /// Stage everything and commit. Returns false when there was nothing to
    /// commit.
    fn commit_all(&self, message: &str) -> Result<bool>;
    /// Push the current branch to its upstream.
    fn push(&self) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if there is anything staged for commit.
    fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl Vcs for Git {
    #[instrument(skip_all)]
    fn commit_all(&self, message: &str) -> Result<bool> {
        self.run_checked(&["add", "-A"])?;
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    #[instrument(skip_all)]
    fn push(&self) -> Result<()> {
        debug!("pushing current branch");
        self.run_checked(&["push"])?;
        Ok(())
    }
}

/// Commit message for a completed task: id plus a bounded prompt excerpt.
pub fn commit_message(id: u64, prompt: &str) -> String {
    let excerpt: String = prompt.chars().take(60).collect();
    format!("agent: complete task #{id} — {excerpt}")
}
