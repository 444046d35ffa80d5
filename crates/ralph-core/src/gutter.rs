//! Detects a task stuck in a loop: the same failure repeating, file churn
//! that never converges, or a failure signature oscillating between two
//! values. Pure function over an ordered record sequence and a config --
//! deterministic given the same input, no clock reads.

use std::collections::HashSet;

use crate::record::{IterationOutcome, IterationRecord};

/// Jaccard overlap on `files_changed`, at or above which two attempts count
/// as "touching the same file set". Not itself a config knob -- the spec
/// leaves this threshold to the implementer to choose and document.
pub const CHURN_JACCARD_THRESHOLD: f64 = 0.8;

/// An attempt whose `files_changed` is at or below this count is a "small
/// commit" for the `max_churn_commits` heuristic.
pub const SMALL_EDIT_FILE_THRESHOLD: usize = 2;

/// Bounds governing the Gutter Detector's signals. Mirrors the
/// `loop.gutter.*` configuration keys.
#[derive(Debug, Clone, Copy)]
pub struct GutterConfig {
    /// Same-failure: this many consecutive identical `failure_signature`s
    /// trips it.
    pub max_same_failure: u32,
    /// Churn: window size, in trailing iterations, considered for the
    /// file-overlap check.
    pub max_churn_iterations: u32,
    /// Churn: how many iterations within the window must touch the same
    /// file set (Jaccard) for it to trip.
    pub churn_threshold: u32,
    /// Churn (alternate form): this many consecutive small commits in a
    /// row also trips it.
    pub max_churn_commits: u32,
    /// Oscillation: half the window length; `2 * max_oscillations`
    /// trailing iterations alternating between two signatures trips it.
    pub max_oscillations: u32,
    /// Gate same-failure and oscillation, both of which compare
    /// `failure_signature` values, behind this flag. Churn (file-set
    /// based) is unaffected.
    pub enable_content_hash: bool,
}

impl Default for GutterConfig {
    fn default() -> Self {
        Self {
            max_same_failure: 3,
            max_churn_iterations: 5,
            churn_threshold: 3,
            max_churn_commits: 2,
            max_oscillations: 2,
            enable_content_hash: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GutterVerdict {
    /// Keep retrying.
    Clear,
    /// Stuck: repeats the same failure signature across attempts.
    SameFailure { repeats: usize },
    /// Stuck: churning across the same files without converging.
    Churning,
    /// Stuck: the failure signature alternates between two values.
    Oscillating,
}

impl GutterVerdict {
    pub fn is_stuck(&self) -> bool {
        !matches!(self, GutterVerdict::Clear)
    }
}

/// Evaluate whether `records` (already ordered oldest-first for one task)
/// show the task stuck in the gutter. Only the trailing run of
/// non-success outcomes matters; a success resets all counters.
pub fn evaluate(records: &[IterationRecord], config: &GutterConfig) -> GutterVerdict {
    let trailing_failures = trailing_failure_run(records);
    if trailing_failures.is_empty() {
        return GutterVerdict::Clear;
    }

    if config.enable_content_hash {
        if let Some(repeats) = same_failure_repeats(trailing_failures) {
            if repeats >= config.max_same_failure as usize {
                return GutterVerdict::SameFailure { repeats };
            }
        }

        if is_oscillating(trailing_failures, config.max_oscillations) {
            return GutterVerdict::Oscillating;
        }
    }

    if is_churning(trailing_failures, config) {
        return GutterVerdict::Churning;
    }

    GutterVerdict::Clear
}

/// The run of trailing records that are not `Success`, most recent last.
fn trailing_failure_run(records: &[IterationRecord]) -> &[IterationRecord] {
    let mut start = records.len();
    for (i, record) in records.iter().enumerate().rev() {
        if record.outcome == IterationOutcome::Success {
            break;
        }
        start = i;
    }
    &records[start..]
}

/// Longest trailing run sharing the same non-empty failure signature.
fn same_failure_repeats(records: &[IterationRecord]) -> Option<usize> {
    let last_signature = records.last()?.failure_signature.as_ref()?;
    let mut count = 0;
    for record in records.iter().rev() {
        match &record.failure_signature {
            Some(sig) if sig == last_signature => count += 1,
            _ => break,
        }
    }
    Some(count)
}

/// True if the trailing `2 * max_oscillations` failures alternate between
/// exactly two distinct `failure_signature` values (ABAB... or BABA...).
fn is_oscillating(records: &[IterationRecord], max_oscillations: u32) -> bool {
    let required = 2 * max_oscillations as usize;
    if required == 0 || records.len() < required {
        return false;
    }
    let window = &records[records.len() - required..];

    let signatures: Option<Vec<&str>> = window
        .iter()
        .map(|r| r.failure_signature.as_deref())
        .collect();
    let Some(signatures) = signatures else {
        return false;
    };

    let distinct: HashSet<&str> = signatures.iter().copied().collect();
    if distinct.len() != 2 {
        return false;
    }

    signatures.windows(2).all(|pair| pair[0] != pair[1])
        && signatures
            .windows(3)
            .all(|triple| triple[0] == triple[2])
}

/// Churn per §4.7: either (a) at least `churn_threshold` iterations within
/// the trailing `max_churn_iterations` window touch the same file set
/// (Jaccard against the most recent attempt), or (b) `max_churn_commits`
/// consecutive trailing attempts are each a "small commit" (few files
/// touched). Both read as "repeatedly touching the same ground without
/// converging", so either trips it.
fn is_churning(records: &[IterationRecord], config: &GutterConfig) -> bool {
    let window_size = (config.max_churn_iterations as usize).min(records.len());
    let threshold = config.churn_threshold as usize;

    if window_size >= threshold && threshold > 0 {
        let window = &records[records.len() - window_size..];
        let reference: HashSet<&str> = window
            .last()
            .map(|r| r.files_changed.iter().map(String::as_str).collect())
            .unwrap_or_default();

        if !reference.is_empty() {
            let matches = window
                .iter()
                .filter(|r| {
                    let files: HashSet<&str> = r.files_changed.iter().map(String::as_str).collect();
                    jaccard(&files, &reference) >= CHURN_JACCARD_THRESHOLD
                })
                .count();
            if matches >= threshold {
                return true;
            }
        }
    }

    small_commit_run(records) >= config.max_churn_commits as usize
}

fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 { 0.0 } else { intersection as f64 / union as f64 }
}

/// Longest trailing run of attempts each touching at most
/// [`SMALL_EDIT_FILE_THRESHOLD`] non-empty files.
fn small_commit_run(records: &[IterationRecord]) -> usize {
    let mut count = 0;
    for record in records.iter().rev() {
        let n = record.files_changed.len();
        if n == 0 || n > SMALL_EDIT_FILE_THRESHOLD {
            break;
        }
        count += 1;
    }
    count
}
