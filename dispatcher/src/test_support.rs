//! Test-only helpers: task fixtures, a scripted agent, a recording VCS and a
//! disposable dispatch directory.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use crate::io::agent::{AgentInvocation, AgentRequest, AgentRunner};
use crate::io::git::Vcs;
use crate::io::init::{DispatchPaths, InitOptions, init_dispatch};
use crate::io::store::{load_tasks, write_tasks};
use crate::task::{Priority, Task, TaskFile, TaskStatus};

/// Create a pending task with a deterministic creation time.
pub fn task(id: u64, prompt: &str) -> Task {
    let created = Utc
        .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("timestamp");
    Task::new(id, prompt, Priority::Medium, None, created)
}

/// Create a task in the given status.
pub fn task_with_status(id: u64, status: TaskStatus) -> Task {
    let mut task = task(id, &format!("task {id}"));
    task.status = status;
    task
}

/// Create a pending task with the given priority.
pub fn task_with_priority(id: u64, priority: Priority) -> Task {
    let mut task = task(id, &format!("task {id}"));
    task.priority = priority;
    task
}

/// Create a pending child of `parent`.
pub fn task_with_parent(id: u64, parent: u64) -> Task {
    let mut task = task(id, &format!("task {id}"));
    task.parent = Some(parent);
    task
}

/// Create a task completed just now, counting against today's cap.
pub fn completed_today(id: u64) -> Task {
    let mut task = task_with_status(id, TaskStatus::Done);
    task.completed_at = Some(Utc::now());
    task
}

/// An initialized `.dispatch` directory rooted in a tempdir.
pub struct DispatchHarness {
    _temp: TempDir,
    pub paths: DispatchPaths,
}

impl DispatchHarness {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create tempdir");
        let paths =
            init_dispatch(temp.path(), &InitOptions { force: false }).expect("init dispatch");
        Self { _temp: temp, paths }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn read_tasks(&self) -> TaskFile {
        load_tasks(&self.paths.schema_path, &self.paths.tasks_path).expect("load task store")
    }

    pub fn write_tasks(&self, file: &TaskFile) -> Result<()> {
        write_tasks(&self.paths.tasks_path, file)
    }

    /// Append one task to the store.
    pub fn push_task(&self, task: Task) {
        let mut file = self.read_tasks();
        file.tasks.push(task);
        write_tasks(&self.paths.tasks_path, &file).expect("write task store");
    }
}

impl Default for DispatchHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// One canned invocation for [`ScriptedRunner`].
pub struct ScriptedInvocation {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output: String,
    pub result_text: Option<String>,
    store_effect: Option<Box<dyn Fn(&Path) + Send>>,
}

impl ScriptedInvocation {
    /// A clean exit with a result payload.
    pub fn success(result: &str) -> Self {
        Self {
            exit_code: Some(0),
            timed_out: false,
            output: result.to_string(),
            result_text: Some(result.to_string()),
            store_effect: None,
        }
    }

    /// A failed exit whose output carries a provider limit message.
    pub fn rate_limited(message: &str) -> Self {
        Self {
            exit_code: Some(1),
            timed_out: false,
            output: message.to_string(),
            result_text: None,
            store_effect: None,
        }
    }

    /// A nonzero exit with a result payload, classified as a hard failure.
    pub fn hard_failure(output: &str) -> Self {
        Self {
            exit_code: Some(1),
            timed_out: false,
            output: output.to_string(),
            result_text: Some(output.to_string()),
            store_effect: None,
        }
    }

    /// Run `effect` against the workdir while the invocation is "running",
    /// standing in for agent or operator writes to the store.
    pub fn with_store_effect(mut self, effect: impl Fn(&Path) + Send + 'static) -> Self {
        self.store_effect = Some(Box::new(effect));
        self
    }
}

/// Replays a fixed script of invocations in order.
pub struct ScriptedRunner {
    script: Mutex<VecDeque<ScriptedInvocation>>,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(script: Vec<ScriptedInvocation>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of invocations consumed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl AgentRunner for ScriptedRunner {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentInvocation> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let scripted = self
            .script
            .lock()
            .expect("lock script")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted runner exhausted"))?;
        if let Some(effect) = &scripted.store_effect {
            effect(&request.workdir);
        }
        Ok(AgentInvocation {
            exit_code: scripted.exit_code,
            timed_out: scripted.timed_out,
            output: scripted.output,
            result_text: scripted.result_text,
            duration: Duration::from_secs(1),
        })
    }
}

/// Records commits and pushes without touching git.
#[derive(Default)]
pub struct RecordingVcs {
    commits: Mutex<Vec<String>>,
    pushes: AtomicUsize,
    fail_push: bool,
}

impl RecordingVcs {
    /// A recorder whose `push` always errors.
    pub fn with_failing_push() -> Self {
        Self {
            fail_push: true,
            ..Self::default()
        }
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().expect("lock commits").clone()
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::Relaxed)
    }
}

impl Vcs for RecordingVcs {
    fn commit_all(&self, message: &str) -> Result<bool> {
        self.commits
            .lock()
            .expect("lock commits")
            .push(message.to_string());
        Ok(true)
    }

    fn push(&self) -> Result<()> {
        if self.fail_push {
            return Err(anyhow!("remote rejected the push"));
        }
        self.pushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Watch the store until a task in `from` appears, then apply `mutate` to it.
///
/// Stands in for a reviewer or operator acting concurrently with the
/// dispatcher. Gives up quietly after a few seconds; the caller's assertions
/// surface the miss.
pub fn mutate_when_seen(
    tasks_path: PathBuf,
    from: TaskStatus,
    mutate: impl Fn(&mut Task) + Send + 'static,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for _ in 0..600 {
            if let Ok(contents) = fs::read_to_string(&tasks_path)
                && let Ok(mut file) = serde_json::from_str::<TaskFile>(&contents)
                && let Some(task) = file.tasks.iter_mut().find(|t| t.status == from)
            {
                mutate(task);
                write_tasks(&tasks_path, &file).expect("write task store");
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    })
}

/// Watch the store until a task in `from` appears, then set it to `to`.
pub fn flip_status_when_seen(
    tasks_path: PathBuf,
    from: TaskStatus,
    to: TaskStatus,
) -> JoinHandle<()> {
    mutate_when_seen(tasks_path, from, move |task| task.status = to)
}
