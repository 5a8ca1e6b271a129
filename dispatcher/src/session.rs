//! One agent invocation, recorded and classified.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument};

use crate::core::classifier::{InvocationFacts, Verdict, classify};
use crate::io::agent::{AgentInvocation, AgentRequest, AgentRunner};
use crate::io::store::update_task;
use crate::task::SessionRecord;

/// Verdict plus the raw invocation it was derived from.
#[derive(Debug)]
pub struct SessionOutcome {
    pub verdict: Verdict,
    pub invocation: AgentInvocation,
}

/// Invoke the agent for `task_id` and record the attempt on the task.
///
/// Every invocation that actually ran leaves a session record, whatever its
/// verdict. A spawn failure bubbles up without a record since no agent ran.
#[instrument(skip_all, fields(task_id, mode = request.mode.as_str()))]
pub fn run_session<R: AgentRunner>(
    runner: &R,
    request: &AgentRequest,
    schema_path: &Path,
    tasks_path: &Path,
    task_id: u64,
    markers: &[String],
) -> Result<SessionOutcome> {
    let started_at = Utc::now();
    let invocation = runner.invoke(request)?;

    let verdict = classify(
        InvocationFacts {
            exit_code: invocation.exit_code,
            timed_out: invocation.timed_out,
            output: &invocation.output,
            result_text: invocation.result_text.as_deref(),
        },
        markers,
    );
    let rate_limited = matches!(verdict, Verdict::RateLimited);

    let record = SessionRecord {
        started_at,
        duration_secs: invocation.duration.as_secs(),
        exit_code: invocation.exit_code,
        rate_limited,
    };
    let observed_at = Utc::now();
    update_task(schema_path, tasks_path, task_id, |task| {
        task.sessions.push(record);
        if rate_limited {
            task.rate_limited_at = Some(observed_at);
        }
    })?;
    info!(task_id, rate_limited, "session recorded");

    Ok(SessionOutcome {
        verdict,
        invocation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::agent::Mode;
    use crate::io::store::load_tasks;
    use crate::task::TaskStatus;
    use crate::test_support::{
        DispatchHarness, ScriptedInvocation, ScriptedRunner, task_with_status,
    };
    use std::time::Duration;

    fn request(harness: &DispatchHarness) -> AgentRequest {
        AgentRequest {
            workdir: harness.root().to_path_buf(),
            prompt: "do the work".to_string(),
            mode: Mode::Plan,
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn successful_session_is_recorded_on_the_task() {
        let harness = DispatchHarness::new();
        harness.push_task(task_with_status(1, TaskStatus::InProgress));
        let runner = ScriptedRunner::new(vec![ScriptedInvocation::success("looks fine")]);

        let outcome = run_session(
            &runner,
            &request(&harness),
            &harness.paths.schema_path,
            &harness.paths.tasks_path,
            1,
            &[],
        )
        .expect("session");

        assert!(matches!(outcome.verdict, Verdict::Success { .. }));
        let file = load_tasks(&harness.paths.schema_path, &harness.paths.tasks_path)
            .expect("load");
        let task = file.get(1).expect("task");
        assert_eq!(task.sessions.len(), 1);
        assert_eq!(task.sessions[0].exit_code, Some(0));
        assert!(!task.sessions[0].rate_limited);
        assert!(task.rate_limited_at.is_none());
    }

    #[test]
    fn rate_limited_session_marks_the_task() {
        let harness = DispatchHarness::new();
        harness.push_task(task_with_status(1, TaskStatus::InProgress));
        let runner =
            ScriptedRunner::new(vec![ScriptedInvocation::rate_limited("usage limit reached")]);

        let outcome = run_session(
            &runner,
            &request(&harness),
            &harness.paths.schema_path,
            &harness.paths.tasks_path,
            1,
            &["usage limit".to_string()],
        )
        .expect("session");

        assert!(matches!(outcome.verdict, Verdict::RateLimited));
        let file = load_tasks(&harness.paths.schema_path, &harness.paths.tasks_path)
            .expect("load");
        let task = file.get(1).expect("task");
        assert_eq!(task.sessions.len(), 1);
        assert!(task.sessions[0].rate_limited);
        assert!(task.rate_limited_at.is_some());
    }
}
