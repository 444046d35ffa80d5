//! The `.ralph/` workspace layout: the only process-wide state this crate
//! keeps. `init` creates it once; every other operation asserts its
//! presence.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateDirError {
    #[error("`.ralph/` workspace not initialized at {0}")]
    NotInitialized(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Handle onto a `.ralph/` directory tree rooted at `root`.
///
/// ```text
/// .ralph/
///   tasks/
///   state/
///     paused
///     parent-task-id
///     feedback-<task-id>.txt
///     skip-reason-<task-id>.txt
///   logs/
///     <agent-name>/
///     iteration-<iter-id>.json
///   archive/
///   progress.md
/// ```
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Open a handle without requiring the directory to already exist; call
    /// [`Self::init`] or [`Self::assert_initialized`] before relying on it.
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        Self {
            root: repo_root.as_ref().join(".ralph"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    pub fn state_subdir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    pub fn progress_file(&self) -> PathBuf {
        self.root.join("progress.md")
    }

    fn paused_file(&self) -> PathBuf {
        self.state_subdir().join("paused")
    }

    fn parent_task_id_file(&self) -> PathBuf {
        self.state_subdir().join("parent-task-id")
    }

    fn feedback_file(&self, task_id: &str) -> PathBuf {
        self.state_subdir().join(format!("feedback-{task_id}.txt"))
    }

    fn skip_reason_file(&self, task_id: &str) -> PathBuf {
        self.state_subdir()
            .join(format!("skip-reason-{task_id}.txt"))
    }

    /// Create every directory in the layout and touch `progress.md` if
    /// absent. Idempotent.
    pub fn init(&self) -> Result<(), StateDirError> {
        std::fs::create_dir_all(self.tasks_dir())?;
        std::fs::create_dir_all(self.state_subdir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.archive_dir())?;
        if !self.progress_file().exists() {
            std::fs::write(self.progress_file(), "")?;
        }
        Ok(())
    }

    /// Every operation other than `init` asserts the workspace is present.
    pub fn assert_initialized(&self) -> Result<(), StateDirError> {
        if !self.root.is_dir() {
            return Err(StateDirError::NotInitialized(self.root.clone()));
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.paused_file().exists()
    }

    pub fn pause(&self) -> Result<(), StateDirError> {
        std::fs::create_dir_all(self.state_subdir())?;
        std::fs::write(self.paused_file(), "")?;
        Ok(())
    }

    pub fn resume(&self) -> Result<(), StateDirError> {
        let path = self.paused_file();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn read_parent_task_id(&self) -> Option<String> {
        std::fs::read_to_string(self.parent_task_id_file())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn write_parent_task_id(&self, id: &str) -> Result<(), StateDirError> {
        std::fs::create_dir_all(self.state_subdir())?;
        std::fs::write(self.parent_task_id_file(), id)?;
        Ok(())
    }

    /// Write a one-shot feedback file for the next prompt build against
    /// `task_id`.
    pub fn write_feedback(&self, task_id: &str, feedback: &str) -> Result<(), StateDirError> {
        std::fs::create_dir_all(self.state_subdir())?;
        std::fs::write(self.feedback_file(task_id), feedback)?;
        Ok(())
    }

    /// Read and atomically delete the feedback file, if present. Consuming
    /// a feedback file is one-shot: the spec requires the file be deleted
    /// once consumed so it is never retained across a second prompt build.
    pub fn take_feedback(&self, task_id: &str) -> Result<Option<String>, StateDirError> {
        let path = self.feedback_file(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        std::fs::remove_file(&path)?;
        Ok(Some(contents))
    }

    pub fn write_skip_reason(&self, task_id: &str, reason: &str) -> Result<(), StateDirError> {
        std::fs::create_dir_all(self.state_subdir())?;
        std::fs::write(self.skip_reason_file(task_id), reason)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_creates_full_layout() {
        let dir = TempDir::new().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        assert!(state.tasks_dir().is_dir());
        assert!(state.state_subdir().is_dir());
        assert!(state.logs_dir().is_dir());
        assert!(state.archive_dir().is_dir());
        assert!(state.progress_file().is_file());
        assert!(state.assert_initialized().is_ok());
    }

    #[test]
    fn uninitialized_dir_fails_assertion() {
        let dir = TempDir::new().unwrap();
        let state = StateDir::new(dir.path());
        assert!(matches!(
            state.assert_initialized(),
            Err(StateDirError::NotInitialized(_))
        ));
    }

    #[test]
    fn pause_resume_roundtrip() {
        let dir = TempDir::new().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        assert!(!state.is_paused());
        state.pause().unwrap();
        assert!(state.is_paused());
        state.resume().unwrap();
        assert!(!state.is_paused());
    }

    #[test]
    fn feedback_is_consumed_exactly_once() {
        let dir = TempDir::new().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        state.write_feedback("t1", "please also handle nulls").unwrap();
        let first = state.take_feedback("t1").unwrap();
        assert_eq!(first.as_deref(), Some("please also handle nulls"));

        let second = state.take_feedback("t1").unwrap();
        assert_eq!(second, None);
    }

    #[test]
    fn parent_task_id_round_trips() {
        let dir = TempDir::new().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        assert_eq!(state.read_parent_task_id(), None);
        state.write_parent_task_id("root-task").unwrap();
        assert_eq!(state.read_parent_task_id().as_deref(), Some("root-task"));
    }
}
