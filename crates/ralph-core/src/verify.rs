//! Runs a task's `verify` argv vectors in order, stopping at the first
//! failure, and produces a stable signature of the failure output so the
//! Gutter Detector can recognize repeats.

use std::path::Path;
use std::process::Command;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::task::Argv;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("task has no verify commands")]
    NoVerifyCommands,

    #[error("failed to run verify command {0:?}: {1}")]
    Spawn(Argv, std::io::Error),
}

/// Outcome of running a task's verify chain once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub passed: bool,
    /// Which command in the chain failed (0-based), if any.
    pub failed_step: Option<usize>,
    /// Last bytes of combined stdout+stderr from the failing command.
    pub failure_output: Option<String>,
    /// Stable hash of the normalized failure output, for repeat detection.
    pub failure_signature: Option<String>,
}

const MAX_FAILURE_BYTES: usize = 2000;

/// Run each command in `verify` in order inside `repo_root`. Stops at the
/// first non-zero exit. A task with an empty verify chain is an error --
/// the linter should have caught this earlier, but this is not a place to
/// silently treat "no checks" as "passed".
pub fn run_verify(verify: &[Argv], repo_root: &Path) -> Result<VerifyOutcome, VerifyError> {
    if verify.is_empty() {
        return Err(VerifyError::NoVerifyCommands);
    }

    for (index, argv) in verify.iter().enumerate() {
        let (program, args) = argv.split_first().ok_or(VerifyError::NoVerifyCommands)?;
        let output = Command::new(program)
            .args(args)
            .current_dir(repo_root)
            .output()
            .map_err(|e| VerifyError::Spawn(argv.clone(), e))?;

        if !output.status.success() {
            let combined = combine_and_trim(&output.stdout, &output.stderr);
            let signature = failure_signature(&combined);
            return Ok(VerifyOutcome {
                passed: false,
                failed_step: Some(index),
                failure_output: Some(combined),
                failure_signature: Some(signature),
            });
        }
    }

    Ok(VerifyOutcome {
        passed: true,
        failed_step: None,
        failure_output: None,
        failure_signature: None,
    })
}

fn combine_and_trim(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(stdout));
    combined.push_str(&String::from_utf8_lossy(stderr));
    if combined.len() <= MAX_FAILURE_BYTES {
        return combined;
    }
    let start = combined.len() - MAX_FAILURE_BYTES;
    let mut start = start;
    while start < combined.len() && !combined.is_char_boundary(start) {
        start += 1;
    }
    combined[start..].to_string()
}

/// Hash a normalized form of the failure output: ANSI escapes stripped,
/// digit/hex-looking runs collapsed, whitespace trimmed. Two failures that
/// differ only in a timestamp or a changing line number hash the same.
fn failure_signature(output: &str) -> String {
    let stripped = strip_ansi(output);
    let normalized = normalize_volatile_tokens(&stripped);
    let mut hasher = Sha256::new();
    hasher.update(normalized.trim().as_bytes());
    hex::encode(hasher.finalize())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Collapse runs of digits (and hex-looking runs) into a placeholder so
/// signatures are stable across line numbers, PIDs, addresses, timestamps.
fn normalize_volatile_tokens(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                chars.next();
            }
            out.push('#');
        } else {
            out.push(c);
        }
    }
    out
}
