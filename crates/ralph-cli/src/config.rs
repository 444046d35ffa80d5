//! Configuration file management for ralph.
//!
//! YAML config resolved through an explicit path, then `./ralph.yaml`,
//! then `$XDG_CONFIG_HOME/ralph/config.yaml` (falling back to
//! `$HOME/.config/ralph/config.yaml`). Every section has a default, so
//! resolution never fails for a missing file -- only for a malformed one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoSection {
    pub root: String,
    pub branch_prefix: String,
}

impl Default for RepoSection {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            branch_prefix: "ralph/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksSection {
    pub backend: String,
    pub path: String,
    pub parent_id_file: String,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            path: ".ralph/tasks".to_string(),
            parent_id_file: ".ralph/state/parent-task-id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub progress_file: String,
    pub archive_dir: String,
    pub max_progress_bytes: u64,
    pub max_recent_iterations: u32,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            progress_file: ".ralph/progress.md".to_string(),
            archive_dir: ".ralph/archive".to_string(),
            max_progress_bytes: 1024 * 1024,
            max_recent_iterations: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub command: Vec<String>,
    pub args: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string()],
            args: vec!["--print".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    pub commands: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSection {
    pub max_iterations: u32,
    pub max_minutes_per_iteration: u64,
    pub max_retries: u32,
    pub max_verification_retries: u32,
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_minutes_per_iteration: 20,
            max_retries: 2,
            max_verification_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GutterSection {
    pub max_same_failure: u32,
    pub max_churn_commits: u32,
    pub max_oscillations: u32,
    pub enable_content_hash: bool,
    pub max_churn_iterations: u32,
    pub churn_threshold: u32,
}

impl Default for GutterSection {
    fn default() -> Self {
        Self {
            max_same_failure: 3,
            max_churn_commits: 2,
            max_oscillations: 2,
            enable_content_hash: true,
            max_churn_iterations: 5,
            churn_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySection {
    pub sandbox: bool,
    pub allowed_commands: Vec<String>,
}

/// The full `ralph.yaml` shape. Every section carries its own default, so
/// a config file can override just the sections it cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RalphConfig {
    pub repo: RepoSection,
    pub tasks: TasksSection,
    pub memory: MemorySection,
    pub agent: AgentSection,
    pub verification: VerificationSection,
    #[serde(rename = "loop")]
    pub loop_: LoopSection,
    pub gutter: GutterSection,
    pub safety: SafetySection,
}

/// Return the ralph config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/ralph` or `~/.config/ralph`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("ralph");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ralph")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

/// Resolve the effective configuration: an explicit `--config` path wins,
/// then `./ralph.yaml`, then the XDG config path. A missing file at any
/// of these is not an error -- only a malformed one is.
pub fn resolve(explicit_path: Option<&Path>) -> Result<RalphConfig> {
    let candidates: Vec<PathBuf> = match explicit_path {
        Some(p) => vec![p.to_path_buf()],
        None => vec![PathBuf::from("ralph.yaml"), default_config_path()],
    };

    for path in &candidates {
        if path.is_file() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file at {}", path.display()))?;
            let config: RalphConfig = serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse config file at {}", path.display()))?;
            return Ok(config);
        }
    }

    Ok(RalphConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_loop_bounds() {
        let config = RalphConfig::default();
        assert_eq!(config.loop_.max_iterations, 50);
        assert_eq!(config.loop_.max_verification_retries, 2);
    }

    #[test]
    fn missing_explicit_path_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist.yaml");
        let config = resolve(Some(&missing)).unwrap();
        assert_eq!(config.repo.branch_prefix, "ralph/");
    }

    #[test]
    fn explicit_path_overrides_partial_sections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ralph.yaml");
        std::fs::write(
            &path,
            "agent:\n  command: [\"opencode\"]\n  args: [\"run\"]\n",
        )
        .unwrap();

        let config = resolve(Some(&path)).unwrap();
        assert_eq!(config.agent.command, vec!["opencode".to_string()]);
        assert_eq!(config.loop_.max_iterations, 50);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ralph.yaml");
        std::fs::write(&path, "not: [valid: yaml: at: all").unwrap();
        assert!(resolve(Some(&path)).is_err());
    }

    #[test]
    fn config_dir_respects_xdg_config_home() {
        let dir = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", dir.path()) };
        let result = config_dir();
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
        assert_eq!(result, dir.path().join("ralph"));
    }
}
