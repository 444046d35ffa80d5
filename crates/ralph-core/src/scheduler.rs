//! Pure task selection. No I/O: the caller loads the task set once and the
//! Scheduler just picks which one runs next.

use crate::task::{Status, Task};

/// Result of one selection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOutcome {
    /// Run this task next.
    Next(Task),
    /// Nothing left to do: every non-skipped task is completed.
    Done,
    /// Nothing is runnable right now, but work remains -- everything open
    /// is blocked on a dependency, a parent, or the gutter.
    Stalled,
}

/// Select the next task to run out of `tasks`, per the deterministic rule:
/// first by sorted id among tasks that are `open`, whose dependencies are
/// all `completed` or `skipped`, whose parent (if any) is neither `failed`
/// nor `blocked`, and which are not themselves gutter-blocked.
pub fn select_next(tasks: &[Task]) -> SchedulerOutcome {
    let mut candidates: Vec<&Task> = tasks.iter().filter(|t| is_runnable(t, tasks)).collect();
    candidates.sort_by(|a, b| a.id.cmp(&b.id));

    if let Some(task) = candidates.into_iter().next() {
        return SchedulerOutcome::Next(task.clone());
    }

    let all_done = tasks
        .iter()
        .all(|t| matches!(t.status, Status::Completed | Status::Skipped));

    if all_done {
        SchedulerOutcome::Done
    } else {
        SchedulerOutcome::Stalled
    }
}

fn is_runnable(task: &Task, all: &[Task]) -> bool {
    if task.status != Status::Open {
        return false;
    }

    let deps_satisfied = task.depends_on.iter().all(|dep_id| {
        all.iter()
            .find(|t| t.id == *dep_id)
            .is_some_and(|dep| matches!(dep.status, Status::Completed | Status::Skipped))
    });
    if !deps_satisfied {
        return false;
    }

    if let Some(parent_id) = &task.parent_id {
        let parent_blocked = all
            .iter()
            .find(|t| t.id == *parent_id)
            .is_some_and(|p| matches!(p.status, Status::Failed | Status::Blocked));
        if parent_blocked {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(id: &str, status: Status) -> Task {
        let mut t = Task::new(id, format!("title {id}"), Utc::now());
        t.status = status;
        t
    }

    #[test]
    fn picks_lowest_id_among_open_tasks() {
        let tasks = vec![
            task("b", Status::Open),
            task("a", Status::Open),
            task("c", Status::Open),
        ];
        assert_eq!(select_next(&tasks), SchedulerOutcome::Next(task("a", Status::Open)));
    }

    #[test]
    fn skips_task_with_unfinished_dependency() {
        let mut dependent = task("b", Status::Open);
        dependent.depends_on.push("a".to_string());
        let tasks = vec![task("a", Status::Open), dependent];
        assert_eq!(select_next(&tasks), SchedulerOutcome::Next(task("a", Status::Open)));
    }

    #[test]
    fn runs_once_dependency_completed_or_skipped() {
        let mut dependent = task("b", Status::Open);
        dependent.depends_on.push("a".to_string());
        let tasks = vec![task("a", Status::Skipped), dependent.clone()];
        assert_eq!(select_next(&tasks), SchedulerOutcome::Next(dependent));
    }

    #[test]
    fn blocked_or_failed_parent_blocks_children() {
        let mut child = task("c", Status::Open);
        child.parent_id = Some("p".to_string());
        let tasks = vec![task("p", Status::Failed), child];
        assert_eq!(select_next(&tasks), SchedulerOutcome::Stalled);
    }

    #[test]
    fn all_completed_or_skipped_is_done() {
        let tasks = vec![task("a", Status::Completed), task("b", Status::Skipped)];
        assert_eq!(select_next(&tasks), SchedulerOutcome::Done);
    }

    #[test]
    fn nothing_runnable_with_remaining_work_is_stalled() {
        let tasks = vec![task("a", Status::Blocked)];
        assert_eq!(select_next(&tasks), SchedulerOutcome::Stalled);
    }

    #[test]
    fn in_progress_tasks_are_never_selected_again() {
        let tasks = vec![task("a", Status::InProgress)];
        assert_eq!(select_next(&tasks), SchedulerOutcome::Stalled);
    }
}
