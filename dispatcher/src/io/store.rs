//! Task store load/save helpers with schema + forest validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::forest;
use crate::task::{Task, TaskFile};

/// Schema the store is validated against on every load.
pub const TASKS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/tasks/v1.schema.json"
));

/// Load and validate the task store (schema + forest).
///
/// A missing file is an empty queue, so a fresh checkout works before
/// anything has been submitted.
pub fn load_tasks(schema_path: &Path, tasks_path: &Path) -> Result<TaskFile> {
    if !tasks_path.exists() {
        debug!(path = %tasks_path.display(), "task store missing, treating as empty");
        return Ok(TaskFile::default());
    }
    let contents = fs::read_to_string(tasks_path)
        .with_context(|| format!("read task store {}", tasks_path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse task store {}", tasks_path.display()))?;
    validate_schema(schema_path, &value)?;
    let file: TaskFile = serde_json::from_value(value)
        .with_context(|| format!("deserialize task store {}", tasks_path.display()))?;
    validate_forest(&file.tasks)?;
    Ok(file)
}

/// Atomically write the store with canonicalized formatting (sorted by id).
pub fn write_tasks(tasks_path: &Path, file: &TaskFile) -> Result<()> {
    let mut cloned = file.clone();
    cloned.sort_tasks();
    let mut buf = serde_json::to_string_pretty(&cloned)?;
    buf.push('\n');
    write_atomic(tasks_path, &buf)
}

/// Reload the store, apply `mutate` to task `id`, and write back.
///
/// Returns false without writing when the task no longer exists. Reloading
/// first keeps edits made by other writers between our read and this write.
pub fn update_task(
    schema_path: &Path,
    tasks_path: &Path,
    id: u64,
    mutate: impl FnOnce(&mut Task),
) -> Result<bool> {
    let mut file = load_tasks(schema_path, tasks_path)?;
    let Some(task) = file.get_mut(id) else {
        debug!(task_id = id, "task vanished before update");
        return Ok(false);
    };
    mutate(task);
    write_tasks(tasks_path, &file)?;
    Ok(true)
}

fn validate_schema(schema_path: &Path, store: &Value) -> Result<()> {
    let schema_contents = fs::read_to_string(schema_path)
        .with_context(|| format!("read schema {}", schema_path.display()))?;
    let schema_value: Value = serde_json::from_str(&schema_contents)
        .with_context(|| format!("parse schema {}", schema_path.display()))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(store) {
        let messages = compiled
            .iter_errors(store)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "task store schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn validate_forest(tasks: &[Task]) -> Result<()> {
    let errors = forest::validate(tasks);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("task store invariants failed: {}", errors.join("; ")))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("task store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp task store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace task store {}", path.display()))?;
    Ok(())
}
