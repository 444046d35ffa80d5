//! Operator-driven corrections outside the loop: retry, skip, undo.
//! Callers are responsible for not running these while the Loop Engine is
//! active -- not enforced by locking, per the concurrency model.

use thiserror::Error;

use crate::git::GitManager;
use crate::record::RecordStore;
use crate::state_dir::StateDir;
use crate::task::Status;
use crate::task_store::TaskStore;

#[derive(Debug, Error)]
pub enum FixError {
    #[error("task {0} is completed; retry is not allowed, use undo instead")]
    RetryOnCompleted(String),

    #[error("task {0} cannot be retried from status {1}")]
    RetryInvalidStatus(String, Status),

    #[error("task {0} is completed; cannot skip a completed task")]
    SkipOnCompleted(String),

    #[error("iteration {0} has an empty base_commit and cannot be undone")]
    UndoEmptyBaseCommit(String),

    #[error(transparent)]
    Task(#[from] crate::task_store::TaskStoreError),

    #[error(transparent)]
    Record(#[from] crate::record::RecordStoreError),

    #[error(transparent)]
    State(#[from] crate::state_dir::StateDirError),

    #[error(transparent)]
    Git(#[from] crate::git::GitError),
}

/// What the caller must confirm before [`undo`] actually mutates anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoConfirmation {
    pub iteration_id: String,
    pub task_id: String,
    pub base_commit: String,
    pub files_to_revert: Vec<String>,
    /// True if the working tree currently has uncommitted changes that
    /// would be discarded by the hard reset.
    pub has_uncommitted_changes: bool,
}

/// `Retry(task_id, feedback?)`: allowed on `failed`; no-op on `open`;
/// errors on `completed`; errors with an explanatory message otherwise.
pub fn retry(
    task_store: &TaskStore,
    state_dir: &StateDir,
    task_id: &str,
    feedback: Option<&str>,
) -> Result<(), FixError> {
    let task = task_store.get(task_id)?;

    match task.status {
        Status::Open => return Ok(()),
        Status::Completed => return Err(FixError::RetryOnCompleted(task_id.to_string())),
        Status::Failed => {}
        other => return Err(FixError::RetryInvalidStatus(task_id.to_string(), other)),
    }

    task_store.update_status(task_id, Status::Open)?;
    if let Some(feedback) = feedback {
        state_dir.write_feedback(task_id, feedback)?;
    }
    Ok(())
}

/// `Skip(task_id, reason?)`: allowed on open/failed/blocked; no-op on
/// skipped; errors on completed.
pub fn skip(
    task_store: &TaskStore,
    state_dir: &StateDir,
    task_id: &str,
    reason: Option<&str>,
) -> Result<(), FixError> {
    let task = task_store.get(task_id)?;

    match task.status {
        Status::Skipped => return Ok(()),
        Status::Completed => return Err(FixError::SkipOnCompleted(task_id.to_string())),
        Status::Open | Status::Failed | Status::Blocked => {}
        Status::InProgress => {
            return Err(FixError::RetryInvalidStatus(task_id.to_string(), task.status))
        }
    }

    task_store.update_status(task_id, Status::Skipped)?;
    if let Some(reason) = reason {
        state_dir.write_skip_reason(task_id, reason)?;
    }
    Ok(())
}

/// First half of `Undo(iteration_id)`: load the record and build the
/// confirmation payload the caller must show before committing to the
/// reset.
pub fn prepare_undo(
    record_store: &RecordStore,
    git: &GitManager,
    iteration_id: &str,
) -> Result<UndoConfirmation, FixError> {
    let record = record_store.get(iteration_id)?;
    if record.base_commit.is_empty() {
        return Err(FixError::UndoEmptyBaseCommit(iteration_id.to_string()));
    }

    Ok(UndoConfirmation {
        iteration_id: record.iteration_id,
        task_id: record.task_id,
        base_commit: record.base_commit,
        files_to_revert: record.files_changed,
        has_uncommitted_changes: git.has_changes().unwrap_or(false),
    })
}

/// Second half: perform the reset the caller already confirmed. If the
/// iteration's outcome was success and the task is still `completed`,
/// reopen it.
pub fn confirm_undo(
    task_store: &TaskStore,
    record_store: &RecordStore,
    git: &GitManager,
    confirmation: &UndoConfirmation,
) -> Result<(), FixError> {
    let record = record_store.get(&confirmation.iteration_id)?;

    git.hard_reset(&confirmation.base_commit)?;

    if record.outcome == crate::record::IterationOutcome::Success {
        let task = task_store.get(&confirmation.task_id)?;
        if task.status == Status::Completed {
            task_store.update_status(&confirmation.task_id, Status::Open)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::IterationOutcome;
    use crate::task::Task;
    use chrono::Utc;
    use ralph_test_utils::TempRepo;

    fn stores(repo: &TempRepo) -> (TaskStore, StateDir, RecordStore, GitManager) {
        let state_dir = StateDir::new(&repo.path);
        state_dir.init().unwrap();
        let task_store = TaskStore::new(state_dir.tasks_dir());
        let record_store = RecordStore::new(state_dir.logs_dir());
        let git = GitManager::new(&repo.path).unwrap();
        (task_store, state_dir, record_store, git)
    }

    #[test]
    fn retry_reopens_failed_task_and_writes_feedback() {
        let repo = TempRepo::new();
        let (task_store, state_dir, _records, _git) = stores(&repo);
        let mut task = Task::new("t1", "title", Utc::now());
        task.status = Status::Failed;
        task_store.save(task).unwrap();

        retry(&task_store, &state_dir, "t1", Some("check nulls")).unwrap();

        assert_eq!(task_store.get("t1").unwrap().status, Status::Open);
        assert_eq!(
            state_dir.take_feedback("t1").unwrap().as_deref(),
            Some("check nulls")
        );
    }

    #[test]
    fn retry_on_open_is_a_no_op() {
        let repo = TempRepo::new();
        let (task_store, state_dir, _records, _git) = stores(&repo);
        task_store.save(Task::new("t1", "title", Utc::now())).unwrap();
        retry(&task_store, &state_dir, "t1", None).unwrap();
        assert_eq!(task_store.get("t1").unwrap().status, Status::Open);
    }

    #[test]
    fn retry_on_completed_errors() {
        let repo = TempRepo::new();
        let (task_store, state_dir, _records, _git) = stores(&repo);
        let mut task = Task::new("t1", "title", Utc::now());
        task.status = Status::Completed;
        task_store.save(task).unwrap();

        assert!(matches!(
            retry(&task_store, &state_dir, "t1", None),
            Err(FixError::RetryOnCompleted(_))
        ));
    }

    #[test]
    fn skip_writes_reason_and_allows_blocked() {
        let repo = TempRepo::new();
        let (task_store, state_dir, _records, _git) = stores(&repo);
        let mut task = Task::new("t1", "title", Utc::now());
        task.status = Status::Blocked;
        task_store.save(task).unwrap();

        skip(&task_store, &state_dir, "t1", Some("manual decision")).unwrap();
        assert_eq!(task_store.get("t1").unwrap().status, Status::Skipped);
    }

    #[test]
    fn skip_on_completed_errors() {
        let repo = TempRepo::new();
        let (task_store, state_dir, _records, _git) = stores(&repo);
        let mut task = Task::new("t1", "title", Utc::now());
        task.status = Status::Completed;
        task_store.save(task).unwrap();

        assert!(matches!(
            skip(&task_store, &state_dir, "t1", None),
            Err(FixError::SkipOnCompleted(_))
        ));
    }

    #[test]
    fn undo_resets_head_and_reopens_completed_task() {
        let repo = TempRepo::new();
        let (task_store, _state_dir, record_store, git) = stores(&repo);
        let base = git.current_head().unwrap();

        let mut task = Task::new("t1", "title", Utc::now());
        task.status = Status::Completed;
        task_store.save(task).unwrap();

        repo.write_file("changed.txt", "content\n");
        let new_head = git.commit("t1: title").unwrap();
        assert_ne!(new_head, base);

        let now = Utc::now();
        record_store
            .append(&crate::record::IterationRecord {
                iteration_id: "iter-1".to_string(),
                task_id: "t1".to_string(),
                base_commit: base.clone(),
                outcome: IterationOutcome::Success,
                files_changed: vec!["changed.txt".to_string()],
                failure_signature: None,
                attempt_number: 1,
                start_time: now,
                end_time: now,
            })
            .unwrap();

        let confirmation = prepare_undo(&record_store, &git, "iter-1").unwrap();
        assert_eq!(confirmation.base_commit, base);
        assert!(!confirmation.has_uncommitted_changes);

        confirm_undo(&task_store, &record_store, &git, &confirmation).unwrap();

        assert_eq!(git.current_head().unwrap(), base);
        assert_eq!(task_store.get("t1").unwrap().status, Status::Open);
    }

    #[test]
    fn undo_rejects_empty_base_commit() {
        let repo = TempRepo::new();
        let (_task_store, _state_dir, record_store, git) = stores(&repo);
        let now = Utc::now();
        record_store
            .append(&crate::record::IterationRecord {
                iteration_id: "iter-1".to_string(),
                task_id: "t1".to_string(),
                base_commit: String::new(),
                outcome: IterationOutcome::Success,
                files_changed: vec![],
                failure_signature: None,
                attempt_number: 1,
                start_time: now,
                end_time: now,
            })
            .unwrap();

        assert!(matches!(
            prepare_undo(&record_store, &git, "iter-1"),
            Err(FixError::UndoEmptyBaseCommit(_))
        ));
    }
}
