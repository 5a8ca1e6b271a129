//! Daily completion accounting.

use chrono::NaiveDate;

use crate::task::Task;

/// Number of tasks completed (done or pushed) on the given UTC day.
pub fn completed_on(tasks: &[Task], day: NaiveDate) -> usize {
    tasks
        .iter()
        .filter(|t| t.status.is_completed())
        .filter(|t| t.completed_at.is_some_and(|at| at.date_naive() == day))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use crate::test_support::task_with_status;
    use chrono::{TimeZone, Utc};

    #[test]
    fn counts_only_completions_on_the_given_day() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).expect("date");
        let mut done_today = task_with_status(1, TaskStatus::Done);
        done_today.completed_at = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single();
        let mut pushed_today = task_with_status(2, TaskStatus::Pushed);
        pushed_today.completed_at = Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 59).single();
        let mut done_yesterday = task_with_status(3, TaskStatus::Done);
        done_yesterday.completed_at = Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).single();
        // Failed on the same day does not count.
        let mut failed_today = task_with_status(4, TaskStatus::Failed);
        failed_today.completed_at = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single();
        // Completed status without a timestamp does not count.
        let done_untimed = task_with_status(5, TaskStatus::Done);

        let tasks = vec![
            done_today,
            pushed_today,
            done_yesterday,
            failed_today,
            done_untimed,
        ];
        assert_eq!(completed_on(&tasks, day), 2);
    }
}
