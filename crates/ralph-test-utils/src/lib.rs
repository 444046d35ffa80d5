//! Shared test scaffolding for ralph integration tests.
//!
//! Builds a throwaway git repository on disk so components that shell out
//! to `git` (the git manager, the loop engine, fix-service undo) can be
//! exercised against a real working tree instead of a mock.

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

/// A scratch git repository with one commit on its default branch.
pub struct TempRepo {
    /// Kept alive for the lifetime of the repo; dropped removes the directory.
    _dir: TempDir,
    pub path: PathBuf,
}

impl TempRepo {
    /// Initialize a new repository at a fresh temp directory with a single
    /// commit (a `README.md`), matching the fixture shape used across this
    /// workspace's git-backed tests.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().to_path_buf();

        let run = |args: &[&str]| {
            let output = Command::new("git")
                .args(args)
                .current_dir(&path)
                .output()
                .unwrap_or_else(|e| panic!("git {} failed: {e}", args.join(" ")));
            assert!(output.status.success(), "git {} failed", args.join(" "));
        };

        run(&["init", "-q"]);
        run(&["config", "user.email", "ralph@localhost"]);
        run(&["config", "user.name", "ralph"]);
        std::fs::write(path.join("README.md"), "# scratch repo\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "initial commit"]);

        Self { _dir: dir, path }
    }

    /// Current `HEAD` commit hash.
    pub fn head(&self) -> String {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&self.path)
            .output()
            .expect("git rev-parse failed");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Write a file relative to the repo root, creating parent directories.
    pub fn write_file(&self, relative: &str, contents: &str) {
        let full = self.path.join(relative);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, contents).unwrap();
    }
}

impl Default for TempRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_repo_has_head_commit() {
        let repo = TempRepo::new();
        assert_eq!(repo.head().len(), 40);
    }
}
