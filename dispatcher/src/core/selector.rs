//! Selection of the next task to dispatch.

use crate::task::{Task, TaskStatus};

/// Pick the next pending task: highest priority first, then lowest id.
pub fn pick_next(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .min_by_key(|t| (t.priority.rank(), t.id))
}

/// The task currently occupying the dispatch slot, if any.
pub fn active_task(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().find(|t| t.status.is_active())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, TaskStatus};
    use crate::test_support::{task, task_with_priority, task_with_status};

    #[test]
    fn high_priority_beats_earlier_id() {
        let tasks = vec![
            task_with_priority(1, Priority::Medium),
            task_with_priority(2, Priority::High),
            task_with_priority(3, Priority::Low),
        ];
        assert_eq!(pick_next(&tasks).map(|t| t.id), Some(2));
    }

    #[test]
    fn equal_priority_ties_break_on_id() {
        let tasks = vec![
            task_with_priority(9, Priority::Medium),
            task_with_priority(4, Priority::Medium),
        ];
        assert_eq!(pick_next(&tasks).map(|t| t.id), Some(4));
    }

    #[test]
    fn only_pending_tasks_are_eligible() {
        let tasks = vec![
            task_with_status(1, TaskStatus::Done),
            task_with_status(2, TaskStatus::Failed),
            task(3, "later"),
        ];
        assert_eq!(pick_next(&tasks).map(|t| t.id), Some(3));
    }

    #[test]
    fn empty_queue_selects_nothing() {
        assert!(pick_next(&[]).is_none());
        assert!(active_task(&[]).is_none());
    }

    #[test]
    fn active_task_finds_any_in_flight_status() {
        let tasks = vec![
            task_with_status(1, TaskStatus::Done),
            task_with_status(2, TaskStatus::PushReview),
            task(3, "queued"),
        ];
        assert_eq!(active_task(&tasks).map(|t| t.id), Some(2));
    }
}
