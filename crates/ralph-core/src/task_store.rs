//! Persistent CRUD of task records, keyed by id, plus the task-set linter
//! and YAML import.
//!
//! One JSON file per task under `tasks/<id>.json`. Writes go through a
//! write-temp-then-rename so a reader never observes a partially written
//! file: `rename(2)` on the same filesystem is atomic.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use crate::task::{Status, Task};

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// File-backed task store rooted at `<state_dir>/tasks/`.
///
/// Reads are lock-free (each task is its own file, rename is atomic so a
/// reader sees old-or-new content never a mix). Writes are serialized
/// through an internal mutex so two concurrent `save` calls cannot race on
/// the same temp-file name.
pub struct TaskStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TaskStore {
    /// Open (or implicitly create) the store at `tasks_dir`.
    pub fn new(tasks_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: tasks_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn get(&self, id: &str) -> Result<Task, TaskStoreError> {
        let path = self.path_for(id);
        let contents = std::fs::read_to_string(&path)
            .map_err(|_| TaskStoreError::NotFound(id.to_string()))?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn list(&self) -> Result<Vec<Task>, TaskStoreError> {
        let mut tasks = Vec::new();
        if !self.dir.exists() {
            return Ok(tasks);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = std::fs::read_to_string(entry.path())?;
            tasks.push(serde_json::from_str(&contents)?);
        }
        tasks.sort_by(|a: &Task, b: &Task| a.id.cmp(&b.id));
        Ok(tasks)
    }

    /// Tasks whose `parent_id` equals `Some(parent)`, or root tasks
    /// (`parent_id == None`) when `parent` is empty.
    pub fn list_by_parent(&self, parent: &str) -> Result<Vec<Task>, TaskStoreError> {
        let all = self.list()?;
        Ok(all
            .into_iter()
            .filter(|t| {
                if parent.is_empty() {
                    t.parent_id.is_none()
                } else {
                    t.parent_id.as_deref() == Some(parent)
                }
            })
            .collect())
    }

    /// Create-or-update. Stamps `updated_at`; preserves `created_at` for an
    /// existing task. Validates before writing.
    pub fn save(&self, mut task: Task) -> Result<Task, TaskStoreError> {
        task.validate().map_err(TaskStoreError::Validation)?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Ok(existing) = self.get(&task.id) {
            task.created_at = existing.created_at;
        }
        task.updated_at = Utc::now();

        std::fs::create_dir_all(&self.dir)?;
        self.write_atomic(&task)?;
        Ok(task)
    }

    pub fn update_status(&self, id: &str, status: Status) -> Result<Task, TaskStoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut task = self.get(id)?;
        task.status = status;
        task.updated_at = Utc::now();
        self.write_atomic(&task)?;
        Ok(task)
    }

    pub fn delete(&self, id: &str) -> Result<(), TaskStoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.path_for(id);
        if !path.exists() {
            return Err(TaskStoreError::NotFound(id.to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn write_atomic(&self, task: &Task) -> Result<(), TaskStoreError> {
        let path = self.path_for(&task.id);
        let tmp_path = self.dir.join(format!(".{}.json.tmp", task.id));
        let pretty = serde_json::to_string_pretty(task)?;
        std::fs::write(&tmp_path, pretty)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Linter
// ---------------------------------------------------------------------------

/// Result of [`lint_task_set`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate cross-task invariants over a whole set: no cycles, every
/// `parent_id`/`depends_on` reference resolves, every leaf task carries at
/// least one `verify` command. Missing `acceptance` is a warning only.
pub fn lint_task_set(tasks: &[Task]) -> LintReport {
    let mut report = LintReport {
        valid: true,
        ..Default::default()
    };

    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

    for task in tasks {
        if let Err(e) = task.validate() {
            report.errors.push(format!("{}: {e}", task.id));
        }
        if task.description.trim().is_empty() {
            report
                .errors
                .push(format!("{}: description must not be empty", task.id));
        }
        if let Some(parent) = &task.parent_id {
            if !ids.contains(parent.as_str()) {
                report
                    .errors
                    .push(format!("{}: parent_id {parent:?} does not exist", task.id));
            }
        }
        for dep in &task.depends_on {
            if !ids.contains(dep.as_str()) {
                report
                    .errors
                    .push(format!("{}: depends_on {dep:?} does not exist", task.id));
            }
        }
        if task.is_leaf_in(tasks) && task.verify.is_empty() {
            report
                .errors
                .push(format!("{}: leaf task has no verify commands", task.id));
        }
        if task.acceptance.is_empty() {
            report
                .warnings
                .push(format!("{}: no acceptance criteria", task.id));
        }
    }

    if let Some(cycle) = find_cycle(tasks) {
        report
            .errors
            .push(format!("dependency cycle detected: {}", cycle.join(" -> ")));
    }

    report.valid = report.errors.is_empty();
    report
}

/// DFS cycle detection over `depends_on` edges using the classic
/// white/gray/black coloring, with deterministic traversal order (tasks
/// visited in sorted-id order, and each task's dependency list walked in
/// declared order).
///
/// Returns the first cycle found, as an ordered list of task ids.
fn find_cycle(tasks: &[Task]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut color: HashMap<&str, Color> = tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();
    let mut stack: Vec<String> = Vec::new();

    let mut sorted_ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    sorted_ids.sort_unstable();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Task>,
        color: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match color.get(id) {
            Some(Color::Black) => return None,
            Some(Color::Gray) => {
                // Found the back-edge; report the cycle from its start.
                let start = stack.iter().position(|s| s == id).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].to_vec();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            _ => {}
        }

        color.insert(id, Color::Gray);
        stack.push(id.to_string());

        if let Some(task) = by_id.get(id) {
            for dep in &task.depends_on {
                if let Some(cycle) = visit(dep.as_str(), by_id, color, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        color.insert(id, Color::Black);
        None
    }

    for id in sorted_ids {
        if color.get(id) == Some(&Color::White) {
            if let Some(cycle) = visit(id, &by_id, &mut color, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// YAML import
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ImportDoc {
    tasks: Vec<ImportTask>,
}

#[derive(Debug, Deserialize)]
struct ImportTask {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "parentId")]
    parent_id: Option<String>,
    #[serde(default, rename = "dependsOn")]
    depends_on: Vec<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    acceptance: Vec<String>,
    #[serde(default)]
    verify: Vec<Vec<String>>,
    #[serde(default)]
    labels: HashMap<String, String>,
}

/// Outcome of [`import_yaml`]: imported tasks plus any per-task errors. A
/// task that fails to parse/validate does not block the rest of the batch.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<Task>,
    pub errors: Vec<String>,
}

/// Parse `{ tasks: [...] }` YAML and import each task into `store`.
///
/// New ids are created with `status=open` (unless overridden) and
/// `created_at=updated_at=now`. Re-importing an existing id updates it in
/// place, preserving `created_at`.
pub fn import_yaml(store: &TaskStore, yaml: &str) -> Result<ImportReport, TaskStoreError> {
    let doc: ImportDoc = serde_yaml::from_str(yaml)
        .map_err(|e| TaskStoreError::Validation(format!("invalid task YAML: {e}")))?;

    let mut report = ImportReport::default();
    let now = Utc::now();

    for raw in doc.tasks {
        let status = match raw.status.as_deref() {
            None => Status::Open,
            Some(s) => match s.parse::<Status>() {
                Ok(s) => s,
                Err(e) => {
                    report.errors.push(format!("{}: {e}", raw.id));
                    continue;
                }
            },
        };

        let task = Task {
            id: raw.id.clone(),
            title: raw.title,
            description: raw.description,
            parent_id: raw.parent_id,
            depends_on: raw.depends_on,
            status,
            acceptance: raw.acceptance,
            verify: raw.verify,
            labels: raw.labels,
            created_at: now,
            updated_at: now,
        };

        match store.save(task) {
            Ok(saved) => report.imported.push(saved),
            Err(e) => report.errors.push(format!("{}: {e}", raw.id)),
        }
    }

    Ok(report)
}
