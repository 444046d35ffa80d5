//! Assembles the bounded, truncated prompt texts sent to the agent.
//!
//! Pure: given a [`Task`] and an [`IterationContext`], produces system/user
//! text. No I/O, no clock reads beyond what the caller supplies.

use thiserror::Error;

use crate::task::Task;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("cannot build a prompt for a nil task")]
    NilTask,
}

/// Per-section and total byte ceilings. Over-budget sections are truncated
/// with an explicit `... [truncated]` marker.
#[derive(Debug, Clone, Copy)]
pub struct PromptLimits {
    pub max_patterns_bytes: usize,
    pub max_diff_bytes: usize,
    pub max_failure_bytes: usize,
    pub max_prompt_bytes: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_patterns_bytes: 4096,
            max_diff_bytes: 4096,
            max_failure_bytes: 2000,
            max_prompt_bytes: 64 * 1024,
        }
    }
}

/// Context gathered by the Loop Engine for this iteration's prompt.
#[derive(Debug, Clone, Default)]
pub struct IterationContext {
    pub codebase_patterns: Option<String>,
    pub diff_stat: Option<String>,
    pub changed_files: Vec<String>,
    pub failure_output: Option<String>,
    pub failure_signature: Option<String>,
    pub user_feedback: Option<String>,
    pub attempt_number: u32,
    pub is_retry: bool,
}

/// The two texts handed to the Agent Runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const SYSTEM_TEXT: &str = "\
You are an autonomous coding agent operating inside a single git \
repository. You will be given one task at a time. Make the smallest \
change that satisfies the task's description and acceptance criteria, \
run nothing yourself beyond what the task asks -- verification is \
handled by the harness after you exit. Do not commit; the harness \
commits on your behalf once verification passes.";

/// Pure function: build the system+user prompt for `task` given `ctx`.
pub fn build_prompt(
    task: &Task,
    ctx: &IterationContext,
    limits: &PromptLimits,
) -> Result<Prompt, PromptError> {
    if task.id.is_empty() {
        return Err(PromptError::NilTask);
    }

    let mut user = String::new();

    user.push_str(&format!("# Task {}: {}\n\n", task.id, task.title));
    if !task.description.is_empty() {
        user.push_str(&task.description);
        user.push_str("\n\n");
    }

    if !task.acceptance.is_empty() {
        user.push_str("## Acceptance criteria\n");
        for a in &task.acceptance {
            user.push_str(&format!("- {a}\n"));
        }
        user.push('\n');
    }

    if !task.verify.is_empty() {
        user.push_str("## Verification commands (run by the harness, not you)\n");
        for argv in &task.verify {
            user.push_str(&format!("- `{}`\n", argv.join(" ")));
        }
        user.push('\n');
    }

    if let Some(patterns) = &ctx.codebase_patterns {
        let truncated = truncate(patterns, limits.max_patterns_bytes);
        user.push_str("## Codebase patterns\n");
        user.push_str(&truncated);
        user.push_str("\n\n");
    }

    if let Some(diff) = &ctx.diff_stat {
        let truncated = truncate(diff, limits.max_diff_bytes);
        user.push_str("## Current git status\n");
        user.push_str(&truncated);
        user.push_str("\n\n");
    }

    if ctx.is_retry {
        user.push_str(&format!(
            "## Retry (attempt {})\n\
             The previous attempt's changes were rolled back. Fix the issue \
             below; do not repeat unrelated work.\n\n",
            ctx.attempt_number
        ));

        if let Some(output) = &ctx.failure_output {
            let truncated = truncate(output, limits.max_failure_bytes);
            user.push_str("### Verification failure output\n```\n");
            user.push_str(&truncated);
            user.push_str("\n```\n\n");
        }

        if let Some(sig) = &ctx.failure_signature {
            user.push_str(&format!("Failure signature: `{sig}`\n\n"));
        }

        if let Some(feedback) = &ctx.user_feedback {
            user.push_str("### Operator feedback\n");
            user.push_str(feedback);
            user.push_str("\n\n");
        }

        user.push_str(
            "This is a fix-only iteration: address the verification failure above, \
             do not introduce unrelated changes.\n",
        );
    }

    let mut prompt = Prompt {
        system: SYSTEM_TEXT.to_string(),
        user,
    };

    let total = prompt.system.len() + prompt.user.len();
    if total > limits.max_prompt_bytes {
        let budget = limits.max_prompt_bytes.saturating_sub(prompt.system.len());
        prompt.user = truncate(&prompt.user, budget);
    }

    Ok(prompt)
}

/// Truncate `s` to at most `max_bytes`, appending an explicit marker if
/// truncated. Respects UTF-8 char boundaries.
fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task() -> Task {
        let mut t = Task::new("t1", "Add a README", Utc::now());
        t.description = "Write a short README.md".to_string();
        t.verify.push(vec!["true".to_string()]);
        t
    }

    #[test]
    fn nil_task_is_an_error() {
        let mut t = task();
        t.id = String::new();
        let err = build_prompt(&t, &IterationContext::default(), &PromptLimits::default());
        assert!(matches!(err, Err(PromptError::NilTask)));
    }

    #[test]
    fn initial_prompt_contains_task_header_and_verify_commands() {
        let prompt = build_prompt(&task(), &IterationContext::default(), &PromptLimits::default())
            .unwrap();
        assert!(prompt.user.contains("Task t1"));
        assert!(prompt.user.contains("Write a short README.md"));
        assert!(prompt.user.contains("`true`"));
        assert!(!prompt.user.contains("Retry"));
    }

    #[test]
    fn retry_prompt_includes_failure_output_and_signature() {
        let ctx = IterationContext {
            is_retry: true,
            attempt_number: 2,
            failure_output: Some("assertion failed at line 10".to_string()),
            failure_signature: Some("deadbeef".to_string()),
            user_feedback: Some("also check edge case zero".to_string()),
            ..Default::default()
        };
        let prompt = build_prompt(&task(), &ctx, &PromptLimits::default()).unwrap();
        assert!(prompt.user.contains("attempt 2"));
        assert!(prompt.user.contains("assertion failed at line 10"));
        assert!(prompt.user.contains("deadbeef"));
        assert!(prompt.user.contains("also check edge case zero"));
        assert!(prompt.user.contains("fix-only"));
    }

    #[test]
    fn over_budget_sections_are_truncated_with_marker() {
        let ctx = IterationContext {
            codebase_patterns: Some("x".repeat(10_000)),
            ..Default::default()
        };
        let limits = PromptLimits {
            max_patterns_bytes: 100,
            ..PromptLimits::default()
        };
        let prompt = build_prompt(&task(), &ctx, &limits).unwrap();
        assert!(prompt.user.contains("... [truncated]"));
    }

    #[test]
    fn total_prompt_respects_max_prompt_bytes() {
        let ctx = IterationContext {
            codebase_patterns: Some("y".repeat(5_000)),
            diff_stat: Some("z".repeat(5_000)),
            ..Default::default()
        };
        let limits = PromptLimits {
            max_prompt_bytes: 1_000,
            ..PromptLimits::default()
        };
        let prompt = build_prompt(&task(), &ctx, &limits).unwrap();
        assert!(prompt.system.len() + prompt.user.len() <= limits.max_prompt_bytes + 32);
    }
}
