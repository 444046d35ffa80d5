//! The error taxonomy shared across every component.
//!
//! Each component defines its own narrow `thiserror` enum; every variant of
//! every component error converts into [`RalphError`] so the Loop Engine can
//! match on *kind* (validation, timeout, cancelled, ...) without caring which
//! component raised it.

use thiserror::Error;

use crate::agent::AgentError;
use crate::fix::FixError;
use crate::git::GitError;
use crate::prompt::PromptError;
use crate::record::RecordStoreError;
use crate::state_dir::StateDirError;
use crate::task_store::TaskStoreError;
use crate::verify::VerifyError;

/// Top-level error kind taxonomy.
#[derive(Debug, Error)]
pub enum RalphError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("agent failed: {0}")]
    Agent(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("gutter: {0}")]
    Gutter(String),

    #[error("state: {0}")]
    State(String),
}

impl From<TaskStoreError> for RalphError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::NotFound(id) => RalphError::NotFound(format!("task {id}")),
            TaskStoreError::Validation(msg) => RalphError::Validation(msg),
            TaskStoreError::Io(e) => RalphError::Io(e),
            TaskStoreError::Serde(e) => RalphError::Validation(e.to_string()),
        }
    }
}

impl From<GitError> for RalphError {
    fn from(e: GitError) -> Self {
        RalphError::Io(std::io::Error::other(e.to_string()))
    }
}

impl From<AgentError> for RalphError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::TimedOut => RalphError::Timeout("agent runner".to_string()),
            AgentError::Cancelled => RalphError::Cancelled,
            AgentError::Spawn(msg) => RalphError::Agent(msg),
            AgentError::NonZeroExit { code } => {
                RalphError::Agent(format!("agent exited with code {code:?}"))
            }
        }
    }
}

impl From<VerifyError> for RalphError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::NoVerifyCommands => {
                RalphError::Validation("task has no verify commands".to_string())
            }
            VerifyError::Spawn(argv, err) => {
                RalphError::Verification(format!("failed to run {argv:?}: {err}"))
            }
        }
    }
}

impl From<RecordStoreError> for RalphError {
    fn from(e: RecordStoreError) -> Self {
        match e {
            RecordStoreError::AlreadyExists(id) => {
                RalphError::State(format!("iteration record {id} already exists"))
            }
            RecordStoreError::NotFound(id) => {
                RalphError::NotFound(format!("iteration record {id}"))
            }
            RecordStoreError::Io(e) => RalphError::Io(e),
            RecordStoreError::Serde(e) => RalphError::State(e.to_string()),
        }
    }
}

impl From<PromptError> for RalphError {
    fn from(e: PromptError) -> Self {
        RalphError::Validation(e.to_string())
    }
}

impl From<StateDirError> for RalphError {
    fn from(e: StateDirError) -> Self {
        match e {
            StateDirError::NotInitialized(path) => {
                RalphError::State(format!(".ralph/ not initialized at {}", path.display()))
            }
            StateDirError::Io(e) => RalphError::Io(e),
        }
    }
}

impl From<FixError> for RalphError {
    fn from(e: FixError) -> Self {
        match e {
            FixError::RetryOnCompleted(_)
            | FixError::SkipOnCompleted(_)
            | FixError::RetryInvalidStatus(..)
            | FixError::UndoEmptyBaseCommit(..) => RalphError::Validation(e.to_string()),
            FixError::Task(e) => e.into(),
            FixError::Record(e) => e.into(),
            FixError::State(e) => e.into(),
            FixError::Git(e) => e.into(),
        }
    }
}
