//! Structural checks over the parent links in the task store.

use std::collections::{HashMap, HashSet};

use crate::task::{Task, TaskStatus};

/// Validate the parent forest. Returns one message per violation.
pub fn validate(tasks: &[Task]) -> Vec<String> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.id) {
            errors.push(format!("duplicate task id {}", task.id));
        }
    }

    let by_id: HashMap<u64, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
    for task in tasks {
        let Some(parent) = task.parent else { continue };
        if !by_id.contains_key(&parent) {
            errors.push(format!(
                "task {} references missing parent {parent}",
                task.id
            ));
            continue;
        }
        if parent >= task.id {
            errors.push(format!(
                "task {} has parent {parent} which must precede it",
                task.id
            ));
        }
        if is_own_ancestor(&by_id, task.id) {
            errors.push(format!("task {} is part of a parent cycle", task.id));
        }
    }

    errors
}

fn is_own_ancestor(by_id: &HashMap<u64, &Task>, id: u64) -> bool {
    let mut visited = HashSet::new();
    let mut current = id;
    while let Some(task) = by_id.get(&current)
        && let Some(parent) = task.parent
    {
        if parent == id {
            return true;
        }
        if !visited.insert(parent) {
            return false;
        }
        current = parent;
    }
    false
}

/// Direct children of `id`, in store order.
pub fn children_of(tasks: &[Task], id: u64) -> Vec<&Task> {
    tasks.iter().filter(|t| t.parent == Some(id)).collect()
}

/// True when any direct child of `id` is still pending.
pub fn has_pending_children(tasks: &[Task], id: u64) -> bool {
    tasks
        .iter()
        .any(|t| t.parent == Some(id) && t.status == TaskStatus::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_with_parent, task_with_status};

    #[test]
    fn valid_forest_has_no_errors() {
        let tasks = vec![
            task(1, "root"),
            task_with_parent(2, 1),
            task_with_parent(3, 1),
        ];
        assert!(validate(&tasks).is_empty());
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let tasks = vec![task(1, "a"), task(1, "b")];
        let errors = validate(&tasks);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("duplicate task id 1"));
    }

    #[test]
    fn missing_parent_is_reported() {
        let tasks = vec![task_with_parent(2, 9)];
        let errors = validate(&tasks);
        assert!(errors[0].contains("missing parent 9"));
    }

    #[test]
    fn parent_must_precede_child() {
        let tasks = vec![task(5, "child first"), task_with_parent(3, 5)];
        let errors = validate(&tasks);
        assert!(errors.iter().any(|e| e.contains("must precede")));
    }

    #[test]
    fn parent_cycles_are_reported() {
        // Hand-built cycle; ordering violations are reported alongside it.
        let mut a = task(1, "a");
        a.parent = Some(2);
        let b = task_with_parent(2, 1);
        let errors = validate(&[a, b]);
        assert!(errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn pending_children_are_detected() {
        let tasks = vec![
            task_with_status(1, TaskStatus::Executing),
            task_with_parent(2, 1),
            task_with_parent(3, 1),
        ];
        assert!(has_pending_children(&tasks, 1));
        assert_eq!(children_of(&tasks, 1).len(), 2);

        let mut done = tasks.clone();
        done[1].status = TaskStatus::Done;
        done[2].status = TaskStatus::Failed;
        assert!(!has_pending_children(&done, 1));
    }
}
