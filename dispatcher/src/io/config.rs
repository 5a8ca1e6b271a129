//! Dispatcher configuration stored under `.dispatch/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Dispatcher configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Seconds to sleep between cycles when the queue is empty or capped.
    pub poll_interval_secs: u64,

    /// Seconds between store re-reads while awaiting a review decision.
    pub approval_poll_secs: u64,

    /// Seconds to wait for a review decision before treating it as rejection.
    pub approval_timeout_secs: u64,

    /// Seconds to pause all dispatching after a rate limit is observed.
    pub cooldown_secs: u64,

    /// Maximum tasks allowed to complete per UTC day.
    pub daily_task_limit: usize,

    /// Wall-clock budget in seconds for a single agent invocation.
    pub invocation_timeout_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Bytes of output tail preserved in failure summaries.
    pub summary_tail_bytes: usize,

    /// Substrings (matched case-insensitively) that mark provider refusal.
    pub rate_limit_markers: Vec<String>,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Base command for the agent CLI (e.g. `["claude"]`). Mode flags and the
    /// prompt are appended per invocation.
    pub command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string()],
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            approval_poll_secs: 10,
            approval_timeout_secs: 24 * 60 * 60,
            cooldown_secs: 2 * 60 * 60,
            daily_task_limit: 20,
            invocation_timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
            summary_tail_bytes: 2_000,
            rate_limit_markers: [
                "usage limit",
                "rate limit",
                "too many requests",
                "quota",
                "overloaded",
                "capacity",
                "429",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            agent: AgentConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        if self.approval_poll_secs == 0 {
            return Err(anyhow!("approval_poll_secs must be > 0"));
        }
        if self.approval_timeout_secs == 0 {
            return Err(anyhow!("approval_timeout_secs must be > 0"));
        }
        if self.cooldown_secs == 0 {
            return Err(anyhow!("cooldown_secs must be > 0"));
        }
        if self.daily_task_limit == 0 {
            return Err(anyhow!("daily_task_limit must be > 0"));
        }
        if self.invocation_timeout_secs == 0 {
            return Err(anyhow!("invocation_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.summary_tail_bytes == 0 {
            return Err(anyhow!("summary_tail_bytes must be > 0"));
        }
        if self.rate_limit_markers.iter().any(|m| m.trim().is_empty()) {
            return Err(anyhow!("rate_limit_markers must not contain empty entries"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn approval_poll(&self) -> Duration {
        Duration::from_secs(self.approval_poll_secs)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DispatcherConfig::default()`.
pub fn load_config(path: &Path) -> Result<DispatcherConfig> {
    if !path.exists() {
        let cfg = DispatcherConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DispatcherConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DispatcherConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DispatcherConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = DispatcherConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn zero_daily_limit_is_rejected() {
        let cfg = DispatcherConfig {
            daily_task_limit: 0,
            ..DispatcherConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "daily_task_limit = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.daily_task_limit, 5);
        assert_eq!(cfg.poll_interval_secs, 60);
        assert_eq!(cfg.agent.command, vec!["claude".to_string()]);
    }
}
