//! The [`Task`] record and its status lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a task. See the module-level lifecycle diagram in
/// [`TaskStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Completed,
    Blocked,
    Failed,
    Skipped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl FromStr for Status {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(StatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Status`] string.
#[derive(Debug, Clone)]
pub struct StatusParseError(pub String);

impl fmt::Display for StatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for StatusParseError {}

/// One argv vector: the program followed by its arguments.
pub type Argv = Vec<String>;

/// A single unit of work tracked by the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub status: Status,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub verify: Vec<Argv>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a new task in the `open` state, stamping both timestamps to
    /// `now`.
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            parent_id: None,
            depends_on: Vec::new(),
            status: Status::Open,
            acceptance: Vec::new(),
            verify: Vec::new(),
            labels: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Structural + content validation applied on every [`crate::task_store::TaskStore::save`].
    ///
    /// Does not check cross-task invariants (cycles, dangling references) --
    /// that's the linter's job over a whole set, run explicitly, not on
    /// every write.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task id must not be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("task title must not be empty".to_string());
        }
        if self.created_at.timestamp() == 0 || self.updated_at.timestamp() == 0 {
            return Err("task timestamps must be non-zero".to_string());
        }
        Ok(())
    }

    /// A leaf is a task no other task names as its parent. Leaves must carry
    /// at least one `verify` command (checked by the linter, not here --
    /// this needs the full set).
    pub fn is_leaf_in(&self, all: &[Task]) -> bool {
        !all.iter().any(|t| t.parent_id.as_deref() == Some(self.id.as_str()))
    }
}

/// The state machine governing [`Task::status`] transitions.
///
/// ```text
/// open -> in_progress -> completed
///                      -> failed -> open (fix retry)
/// completed -> open (undo)
/// open|failed|blocked -> skipped
/// any non-terminal -> blocked (gutter)
/// ```
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Whether `from -> to` is a legal transition per the lifecycle above.
    pub fn is_valid_transition(from: Status, to: Status) -> bool {
        use Status::*;
        matches!(
            (from, to),
            (Open, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, Open)
                | (Completed, Open)
                | (Open, Blocked)
                | (InProgress, Blocked)
                | (Failed, Blocked)
                | (Open, Skipped)
                | (Failed, Skipped)
                | (Blocked, Skipped)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn status_round_trips_through_display_and_from_str() {
        for s in [
            Status::Open,
            Status::InProgress,
            Status::Completed,
            Status::Blocked,
            Status::Failed,
            Status::Skipped,
        ] {
            let rendered = s.to_string();
            assert_eq!(rendered.parse::<Status>().unwrap(), s);
        }
    }

    #[test]
    fn new_task_is_open_with_matching_timestamps() {
        let t = Task::new("t1", "Do the thing", now());
        assert_eq!(t.status, Status::Open);
        assert_eq!(t.created_at, t.updated_at);
    }

    #[test]
    fn validate_rejects_empty_id_and_title() {
        let mut t = Task::new("t1", "title", now());
        t.id = "  ".to_string();
        assert!(t.validate().is_err());

        let mut t = Task::new("t1", "title", now());
        t.title = String::new();
        assert!(t.validate().is_err());
    }

    #[test]
    fn completed_never_transitions_to_anything_but_open() {
        for to in [
            Status::InProgress,
            Status::Blocked,
            Status::Failed,
            Status::Skipped,
        ] {
            assert!(!TaskStateMachine::is_valid_transition(
                Status::Completed,
                to
            ));
        }
        assert!(TaskStateMachine::is_valid_transition(
            Status::Completed,
            Status::Open
        ));
    }

    #[test]
    fn is_leaf_in_detects_children() {
        let parent = Task::new("p", "parent", now());
        let mut child = Task::new("c", "child", now());
        child.parent_id = Some("p".to_string());
        let all = vec![parent.clone(), child.clone()];
        assert!(!parent.is_leaf_in(&all));
        assert!(child.is_leaf_in(&all));
    }
}
