//! Working-tree observation and mutation, shelling out to `git` in the repo
//! root. The only component allowed to invoke git.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Shells out to `git` inside a single working tree. No worktree/branch
/// isolation: this harness operates directly on the repo the user pointed
/// it at.
#[derive(Debug, Clone)]
pub struct GitManager {
    repo_root: PathBuf,
}

impl GitManager {
    /// Open a manager for `repo_root`, verifying it is a git repository.
    pub fn new(repo_root: impl Into<PathBuf>) -> Result<Self, GitError> {
        let repo_root = repo_root.into();
        let output = Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(&repo_root)
            .output()
            .map_err(|e| GitError::GitCommand {
                message: "failed to run git rev-parse".to_string(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(GitError::NotAGitRepo(repo_root));
        }
        Ok(Self { repo_root })
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output, GitError> {
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| GitError::GitCommand {
                message: format!("failed to run git {}", args.join(" ")),
                source: e,
            })
    }

    fn run_checked(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(GitError::GitExit {
                command: args.join(" "),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `git rev-parse HEAD`.
    pub fn current_head(&self) -> Result<String, GitError> {
        self.run_checked(&["rev-parse", "HEAD"])
    }

    /// `git status --porcelain` is non-empty.
    pub fn has_changes(&self) -> Result<bool, GitError> {
        let status = self.run_checked(&["status", "--porcelain"])?;
        Ok(!status.is_empty())
    }

    /// Paths with uncommitted changes, from `git status --porcelain`.
    pub fn changed_files(&self) -> Result<Vec<String>, GitError> {
        let status = self.run_checked(&["status", "--porcelain"])?;
        Ok(status
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l[3..].trim().to_string())
            .collect())
    }

    /// `git diff --stat HEAD` (includes staged and unstaged changes).
    pub fn diff_stat(&self) -> Result<String, GitError> {
        self.run_checked(&["diff", "--stat", "HEAD"])
    }

    /// Stage everything and commit with `message`. Returns the new commit
    /// hash. Returns an error if there is nothing to commit -- callers
    /// should check [`Self::has_changes`] first if that's a possible state.
    pub fn commit(&self, message: &str) -> Result<String, GitError> {
        self.run_checked(&["add", "-A"])?;
        self.run_checked(&["commit", "-m", message])?;
        self.current_head()
    }

    /// `git reset --hard <hash>`, discarding all uncommitted changes.
    pub fn hard_reset(&self, hash: &str) -> Result<(), GitError> {
        self.run_checked(&["reset", "--hard", hash])?;
        Ok(())
    }

    /// Create and check out `name` if it does not already exist; otherwise
    /// check it out.
    pub fn ensure_branch(&self, name: &str) -> Result<(), GitError> {
        let exists = self
            .run(&["rev-parse", "--verify", "--quiet", name])?
            .status
            .success();
        if exists {
            self.run_checked(&["checkout", name])?;
        } else {
            self.run_checked(&["checkout", "-b", name])?;
        }
        Ok(())
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

/// Build a commit message from a task id and outcome, per §4.8 COMMIT.
pub fn commit_message(task_id: &str, title: &str) -> String {
    format!("{task_id}: {title}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_test_utils::TempRepo;

    #[test]
    fn new_rejects_non_git_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            GitManager::new(dir.path()),
            Err(GitError::NotAGitRepo(_))
        ));
    }

    #[test]
    fn current_head_matches_repo_head() {
        let repo = TempRepo::new();
        let git = GitManager::new(&repo.path).unwrap();
        assert_eq!(git.current_head().unwrap(), repo.head());
    }

    #[test]
    fn has_changes_and_changed_files_reflect_working_tree() {
        let repo = TempRepo::new();
        let git = GitManager::new(&repo.path).unwrap();
        assert!(!git.has_changes().unwrap());

        repo.write_file("src/lib.rs", "fn main() {}\n");
        assert!(git.has_changes().unwrap());
        assert_eq!(git.changed_files().unwrap(), vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn commit_advances_head_with_expected_parent() {
        let repo = TempRepo::new();
        let git = GitManager::new(&repo.path).unwrap();
        let base = git.current_head().unwrap();

        repo.write_file("new.txt", "content\n");
        let new_head = git.commit(&commit_message("t1", "Add new file")).unwrap();

        assert_ne!(new_head, base);
        assert!(!git.has_changes().unwrap());
    }

    #[test]
    fn hard_reset_restores_clean_tree_at_base() {
        let repo = TempRepo::new();
        let git = GitManager::new(&repo.path).unwrap();
        let base = git.current_head().unwrap();

        repo.write_file("scratch.txt", "oops\n");
        assert!(git.has_changes().unwrap());

        git.hard_reset(&base).unwrap();
        assert_eq!(git.current_head().unwrap(), base);
        assert!(!git.has_changes().unwrap());
    }

    #[test]
    fn ensure_branch_creates_then_reuses() {
        let repo = TempRepo::new();
        let git = GitManager::new(&repo.path).unwrap();
        git.ensure_branch("ralph/feature").unwrap();
        git.ensure_branch("ralph/feature").unwrap();
    }
}
