//! Agent abstraction for delegated task work.
//!
//! The [`AgentRunner`] trait decouples dispatch orchestration from the actual
//! agent backend (currently the `claude` CLI). Tests use scripted runners that
//! return predetermined outputs without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::io::process::run_command_with_timeout;

/// Which phase the invocation runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read-only analysis producing a plan for review.
    Plan,
    /// Full permissions to carry out the approved plan.
    Execute,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Execute => "execute",
        }
    }

    fn cli_flag(self) -> &'static str {
        match self {
            Self::Plan => "--plan",
            Self::Execute => "--dangerously-skip-permissions",
        }
    }
}

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text passed to the agent.
    pub prompt: String,
    pub mode: Mode,
    /// Maximum time to wait for the invocation to complete.
    pub timeout: Duration,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// What came back from one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Combined stdout/stderr, escape sequences stripped.
    pub output: String,
    /// Payload of the final `result` event in the agent's stream, if any.
    pub result_text: Option<String>,
    pub duration: Duration,
}

/// Abstraction over agent backends.
pub trait AgentRunner {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentInvocation>;
}

/// Runner that spawns the agent CLI.
pub struct CliRunner {
    command: Vec<String>,
}

impl CliRunner {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("agent command must be a non-empty array"));
        }
        Ok(Self { command })
    }
}

impl AgentRunner for CliRunner {
    #[instrument(skip_all, fields(mode = request.mode.as_str(), timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentInvocation> {
        info!(workdir = %request.workdir.display(), "starting agent invocation");

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg(request.mode.cli_flag())
            .current_dir(&request.workdir);

        let started = Instant::now();
        let captured = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .context("run agent")?;
        let duration = started.elapsed();

        let stdout = strip_ansi(&String::from_utf8_lossy(&captured.stdout));
        let stderr = strip_ansi(&String::from_utf8_lossy(&captured.stderr));
        let result_text = final_result_text(&stdout);

        let mut output = stdout;
        output.push_str(&captured.stdout_truncated_notice("agent"));
        if !stderr.trim().is_empty() {
            output.push('\n');
            output.push_str(&stderr);
        }
        output.push_str(&captured.stderr_truncated_notice("agent"));

        debug!(
            exit_code = ?captured.status.code(),
            timed_out = captured.timed_out,
            has_result = result_text.is_some(),
            "agent invocation finished"
        );
        Ok(AgentInvocation {
            exit_code: captured.status.code(),
            timed_out: captured.timed_out,
            output,
            result_text,
            duration,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    result: Option<String>,
}

/// Extract the payload of the last `result` event from a stream-json log.
///
/// Non-JSON lines (progress noise, partial writes) are skipped.
pub fn final_result_text(stdout: &str) -> Option<String> {
    let mut result = None;
    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(event) = serde_json::from_str::<StreamEvent>(trimmed)
            && event.kind == "result"
        {
            result = event.result;
        }
    }
    result
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// Remove ANSI escape sequences so markers match and stored text stays clean.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_result_text_takes_the_last_result_event() {
        let stdout = concat!(
            "{\"type\":\"system\",\"subtype\":\"init\"}\n",
            "not json at all\n",
            "{\"type\":\"result\",\"result\":\"first\"}\n",
            "{\"type\":\"assistant\"}\n",
            "{\"type\":\"result\",\"result\":\"second\"}\n",
        );
        assert_eq!(final_result_text(stdout), Some("second".to_string()));
    }

    #[test]
    fn final_result_text_handles_streams_without_results() {
        assert_eq!(final_result_text(""), None);
        assert_eq!(final_result_text("{\"type\":\"assistant\"}"), None);
        // A result event without a payload yields nothing.
        assert_eq!(final_result_text("{\"type\":\"result\"}"), None);
    }

    #[test]
    fn strip_ansi_removes_color_codes() {
        let colored = "\x1b[31merror\x1b[0m: usage limit\x1b[2K";
        assert_eq!(strip_ansi(colored), "error: usage limit");
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CliRunner::new(Vec::new()).is_err());
        assert!(CliRunner::new(vec!["  ".to_string()]).is_err());
        assert!(CliRunner::new(vec!["claude".to_string()]).is_ok());
    }
}
