//! Prompt composition for the two agent phases.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::task::Task;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const EXECUTE_TEMPLATE: &str = include_str!("prompts/execute.md");

/// Template engine wrapper around minijinja.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("execute", EXECUTE_TEMPLATE)
            .expect("execute template should be valid");
        Self { env }
    }

    /// Render the planning prompt for a task.
    pub fn plan(&self, task: &Task) -> Result<String> {
        let template = self.env.get_template("plan")?;
        let rendered = template.render(context! {
            id => task.id,
            prompt => task.prompt.trim(),
            priority => task.priority.as_str(),
        })?;
        Ok(rendered)
    }

    /// Render the execution prompt.
    ///
    /// Carries the approved plan (when one exists) and the decomposition
    /// protocol, which needs the store path and the next free task id.
    pub fn execute(&self, task: &Task, tasks_path: &str, next_id: u64) -> Result<String> {
        let template = self.env.get_template("execute")?;
        let rendered = template.render(context! {
            id => task.id,
            prompt => task.prompt.trim(),
            plan => task.plan.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            tasks_path => tasks_path,
            next_id => next_id,
        })?;
        Ok(rendered)
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}
