//! Initialization helpers for `.dispatch/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{DispatcherConfig, write_config};
use super::status::{StatusSnapshot, write_status};
use super::store::{TASKS_SCHEMA, write_tasks};
use crate::task::TaskFile;

/// All canonical paths within `.dispatch/` for a project root.
#[derive(Debug, Clone)]
pub struct DispatchPaths {
    pub root: PathBuf,
    pub dispatch_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub schema_path: PathBuf,
    pub config_path: PathBuf,
    pub status_path: PathBuf,
    pub progress_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl DispatchPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dispatch_dir = root.join(".dispatch");
        Self {
            root,
            tasks_path: dispatch_dir.join("tasks.json"),
            schema_path: dispatch_dir.join("schema.json"),
            config_path: dispatch_dir.join("config.toml"),
            status_path: dispatch_dir.join("status.json"),
            progress_path: dispatch_dir.join("PROGRESS.md"),
            gitignore_path: dispatch_dir.join(".gitignore"),
            dispatch_dir,
        }
    }
}

/// Options for `init_dispatch`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing dispatcher-owned files.
    pub force: bool,
}

/// Create `.dispatch/` scaffolding in `root`.
///
/// Fails if `.dispatch/` already exists unless `options.force` is set.
pub fn init_dispatch(root: &Path, options: &InitOptions) -> Result<DispatchPaths> {
    let paths = DispatchPaths::new(root);
    if paths.dispatch_dir.exists() && !options.force {
        return Err(anyhow!(
            "dispatch init: .dispatch already exists (use --force to overwrite)"
        ));
    }
    if paths.dispatch_dir.exists() && !paths.dispatch_dir.is_dir() {
        return Err(anyhow!(
            "dispatch init: .dispatch exists but is not a directory"
        ));
    }

    create_dir(&paths.dispatch_dir)?;

    write_file(&paths.schema_path, TASKS_SCHEMA)?;
    write_tasks(&paths.tasks_path, &TaskFile::default())?;
    write_config(&paths.config_path, &DispatcherConfig::default())?;
    write_status(&paths.status_path, &StatusSnapshot::idle())?;
    write_file(&paths.progress_path, PROGRESS_HEADER)?;
    write_file(&paths.gitignore_path, DISPATCH_GITIGNORE)?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const PROGRESS_HEADER: &str = "# Progress Log\n\nCompleted tasks are appended here by the dispatcher.\n";
const DISPATCH_GITIGNORE: &str = "status.json\n*.tmp\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::store::load_tasks;

    /// Verifies init_dispatch creates the complete scaffolding.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        let paths = init_dispatch(root, &InitOptions { force: false }).expect("init");

        assert!(paths.dispatch_dir.is_dir());
        assert!(paths.tasks_path.is_file());
        assert!(paths.schema_path.is_file());
        assert!(paths.config_path.is_file());
        assert!(paths.status_path.is_file());
        assert!(paths.progress_path.is_file());
        assert!(paths.gitignore_path.is_file());

        let file = load_tasks(&paths.schema_path, &paths.tasks_path).expect("load tasks");
        assert!(file.tasks.is_empty());
        let cfg = load_config(&paths.config_path).expect("load config");
        assert_eq!(cfg, DispatcherConfig::default());

        let gitignore = fs::read_to_string(&paths.gitignore_path).expect("read gitignore");
        assert_eq!(gitignore, DISPATCH_GITIGNORE);
    }

    /// Verifies init_dispatch refuses to overwrite without --force.
    #[test]
    fn init_without_force_refuses_existing_dispatch_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        init_dispatch(root, &InitOptions { force: false }).expect("init");
        let err = init_dispatch(root, &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// Verifies init_dispatch with --force resets dispatcher-owned files.
    #[test]
    fn init_with_force_rewrites_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let paths = init_dispatch(root, &InitOptions { force: false }).expect("init");

        fs::write(&paths.progress_path, "custom").expect("write custom");

        init_dispatch(root, &InitOptions { force: true }).expect("re-init");
        let progress = fs::read_to_string(&paths.progress_path).expect("read progress");
        assert_eq!(progress, PROGRESS_HEADER);
    }
}
