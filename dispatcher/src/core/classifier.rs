//! Outcome classification for a finished agent invocation.

/// What a finished invocation means for the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The agent finished and produced a result payload.
    Success { result: String },
    /// The provider refused the request; the task should requeue and the
    /// dispatcher should cool down.
    RateLimited,
    /// The invocation failed for a non-transient reason.
    HardFailure { reason: String },
}

/// Observable facts about one invocation.
#[derive(Debug, Clone, Copy)]
pub struct InvocationFacts<'a> {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Combined captured output, already stripped of escape sequences.
    pub output: &'a str,
    /// Final result payload extracted from the agent's event stream.
    pub result_text: Option<&'a str>,
}

/// Classify an invocation.
///
/// Precedence: timeout, then rate-limit markers in the output, then the
/// exit code / result payload combination. A nonzero exit without any
/// result payload is treated as rate limiting, since the agent dies that
/// way when the provider refuses before a stream starts.
pub fn classify(facts: InvocationFacts<'_>, markers: &[String]) -> Verdict {
    if facts.timed_out {
        return Verdict::HardFailure {
            reason: "invocation timed out".to_string(),
        };
    }
    if hits_marker(facts.output, markers) {
        return Verdict::RateLimited;
    }
    match (facts.exit_code, facts.result_text) {
        (Some(0), Some(result)) => Verdict::Success {
            result: result.to_string(),
        },
        (Some(0), None) => Verdict::HardFailure {
            reason: "agent exited 0 without a result payload".to_string(),
        },
        (_, None) => Verdict::RateLimited,
        (code, Some(_)) => Verdict::HardFailure {
            reason: format!(
                "agent exited with {}",
                code.map_or("signal".to_string(), |c| format!("code {c}"))
            ),
        },
    }
}

fn hits_marker(output: &str, markers: &[String]) -> bool {
    let haystack = output.to_lowercase();
    markers
        .iter()
        .any(|marker| haystack.contains(&marker.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["usage limit".to_string(), "429".to_string()]
    }

    fn facts(exit_code: Option<i32>, output: &'static str) -> InvocationFacts<'static> {
        InvocationFacts {
            exit_code,
            timed_out: false,
            output,
            result_text: None,
        }
    }

    #[test]
    fn timeout_outranks_everything() {
        let facts = InvocationFacts {
            exit_code: Some(0),
            timed_out: true,
            output: "usage limit reached",
            result_text: Some("done"),
        };
        assert_eq!(
            classify(facts, &markers()),
            Verdict::HardFailure {
                reason: "invocation timed out".to_string()
            }
        );
    }

    #[test]
    fn markers_match_case_insensitively() {
        let facts = InvocationFacts {
            exit_code: Some(0),
            timed_out: false,
            output: "Error: Usage Limit reached, retry later",
            result_text: Some("partial"),
        };
        assert_eq!(classify(facts, &markers()), Verdict::RateLimited);
    }

    #[test]
    fn clean_exit_with_result_is_success() {
        let facts = InvocationFacts {
            result_text: Some("all tests green"),
            ..facts(Some(0), "log noise")
        };
        assert_eq!(
            classify(facts, &markers()),
            Verdict::Success {
                result: "all tests green".to_string()
            }
        );
    }

    #[test]
    fn clean_exit_without_result_is_a_hard_failure() {
        let verdict = classify(facts(Some(0), "truncated stream"), &markers());
        assert!(matches!(verdict, Verdict::HardFailure { ref reason } if reason.contains("without a result")));
    }

    #[test]
    fn dirty_exit_without_result_is_rate_limited() {
        assert_eq!(
            classify(facts(Some(1), "connection dropped"), &markers()),
            Verdict::RateLimited
        );
        assert_eq!(classify(facts(None, ""), &markers()), Verdict::RateLimited);
    }

    #[test]
    fn dirty_exit_with_result_is_a_hard_failure() {
        let facts = InvocationFacts {
            result_text: Some("something broke"),
            ..facts(Some(2), "stack trace")
        };
        let verdict = classify(facts, &markers());
        assert!(matches!(verdict, Verdict::HardFailure { ref reason } if reason.contains("code 2")));

        let signal = InvocationFacts {
            result_text: Some("killed"),
            ..self::facts(None, "")
        };
        let verdict = classify(signal, &markers());
        assert!(matches!(verdict, Verdict::HardFailure { ref reason } if reason.contains("signal")));
    }
}
