//! The SELECT → PREPARE → RUN_AGENT → OBSERVE → VERIFY → {COMMIT,RESET} →
//! RECORD state machine. Single-threaded: one iteration runs start to
//! finish before the next SELECT, matching the concurrency model -- no
//! two iterations overlap, and every suspension point (subprocess exit,
//! file I/O, pause poll) observes the cancellation token.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentError, Harness};
use crate::error::RalphError;
use crate::git::{commit_message, GitManager};
use crate::gutter::{self, GutterConfig, GutterVerdict};
use crate::prompt::{self, IterationContext, PromptLimits};
use crate::record::{IterationOutcome, IterationRecord, RecordStore};
use crate::scheduler::{self, SchedulerOutcome};
use crate::state_dir::StateDir;
use crate::task::{Status, Task};
use crate::task_store::TaskStore;
use crate::verify;

/// Bounds governing one run of the loop. Mirrors the `loop.*` configuration
/// keys.
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub max_minutes_per_iteration: u64,
    pub max_verification_retries: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_minutes_per_iteration: 20,
            max_verification_retries: 2,
        }
    }
}

/// Why the loop stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// SELECT found nothing left: every non-skipped task is completed.
    Done,
    /// SELECT found nothing runnable but work remains.
    Stalled,
    /// Hit `max_iterations` before finishing.
    MaxIterationsReached,
    /// External cancellation drained the current iteration then exited.
    Cancelled,
}

/// Result of running one iteration to its end: either the outer loop
/// should re-SELECT, or a cancellation was observed and the whole run
/// should stop.
enum IterationOutcomeSignal {
    Continue,
    Cancelled,
}

pub struct LoopEngine {
    repo_root: PathBuf,
    task_store: TaskStore,
    state_dir: StateDir,
    record_store: RecordStore,
    git: GitManager,
    harness: Box<dyn Harness>,
    config: LoopConfig,
    gutter_config: GutterConfig,
    prompt_limits: PromptLimits,
}

impl LoopEngine {
    pub fn new(
        repo_root: PathBuf,
        task_store: TaskStore,
        state_dir: StateDir,
        record_store: RecordStore,
        git: GitManager,
        harness: Box<dyn Harness>,
        config: LoopConfig,
        gutter_config: GutterConfig,
    ) -> Self {
        Self {
            repo_root,
            task_store,
            state_dir,
            record_store,
            git,
            harness,
            config,
            gutter_config,
            prompt_limits: PromptLimits::default(),
        }
    }

    /// Drive the loop until done, stalled, exhausted, or cancelled.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<LoopExit, RalphError> {
        self.state_dir.assert_initialized()?;

        let mut iterations_run: u32 = 0;

        loop {
            self.wait_while_paused(cancel).await;
            if cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }

            if iterations_run >= self.config.max_iterations {
                return Ok(LoopExit::MaxIterationsReached);
            }

            let task = match self.select_applying_gutter()? {
                SchedulerOutcome::Next(task) => task,
                SchedulerOutcome::Done => return Ok(LoopExit::Done),
                SchedulerOutcome::Stalled => return Ok(LoopExit::Stalled),
            };

            iterations_run += 1;
            match self.run_iteration(&task, cancel).await? {
                IterationOutcomeSignal::Continue => {}
                IterationOutcomeSignal::Cancelled => return Ok(LoopExit::Cancelled),
            }
        }
    }

    async fn wait_while_paused(&self, cancel: &CancellationToken) {
        while self.state_dir.is_paused() && !cancel.is_cancelled() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            }
        }
    }

    /// SELECT, but first give the Gutter Detector a chance to block any
    /// open task whose history is stuck, then re-select.
    fn select_applying_gutter(&self) -> Result<SchedulerOutcome, RalphError> {
        let mut tasks = self.task_store.list()?;

        for task in &tasks {
            if task.status != Status::Open {
                continue;
            }
            let history = self.record_store.for_task(&task.id)?;
            if let GutterVerdict::Clear = gutter::evaluate(&history, &self.gutter_config) {
                continue;
            }
            warn!(task_id = %task.id, "gutter detector blocking task");
            self.task_store.update_status(&task.id, Status::Blocked)?;
        }

        tasks = self.task_store.list()?;
        Ok(scheduler::select_next(&tasks))
    }

    /// Run one full iteration (PREPARE through RECORD) for `task`.
    async fn run_iteration(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<IterationOutcomeSignal, RalphError> {
        let start_time = chrono::Utc::now();
        let base_commit = self.git.current_head()?;
        let iteration_id = make_iteration_id(&task.id, start_time);

        info!(task_id = %task.id, iteration_id = %iteration_id, "starting iteration");
        self.task_store.update_status(&task.id, Status::InProgress)?;

        let timeout = Duration::from_secs(self.config.max_minutes_per_iteration * 60);
        let max_attempts = self.config.max_verification_retries + 1;

        let mut ctx = IterationContext::default();
        let mut attempt: u32 = 1;

        loop {
            ctx.attempt_number = attempt;
            ctx.is_retry = attempt > 1;

            let prompt = prompt::build_prompt(task, &ctx, &self.prompt_limits)?;
            let log_path = self
                .state_dir
                .logs_dir()
                .join(self.harness.name())
                .join(format!("{iteration_id}-attempt-{attempt}.log"));

            let run_result = self
                .harness
                .run(&prompt, &self.repo_root, &log_path, timeout, cancel)
                .await;

            let non_success_outcome = match &run_result {
                Ok(run) if run.exit_code == Some(0) => None,
                Ok(_) => Some(IterationOutcome::AgentFailed),
                Err(AgentError::TimedOut) => Some(IterationOutcome::TimedOut),
                Err(AgentError::Cancelled) => Some(IterationOutcome::Cancelled),
                Err(_) => Some(IterationOutcome::AgentFailed),
            };

            if let Some(outcome) = non_success_outcome {
                self.task_store.update_status(&task.id, Status::Failed)?;
                let end_time = chrono::Utc::now();
                self.record_store.append(&IterationRecord {
                    iteration_id,
                    task_id: task.id.clone(),
                    base_commit,
                    outcome,
                    files_changed: Vec::new(),
                    failure_signature: None,
                    attempt_number: attempt,
                    start_time,
                    end_time,
                })?;
                return Ok(if outcome == IterationOutcome::Cancelled {
                    IterationOutcomeSignal::Cancelled
                } else {
                    IterationOutcomeSignal::Continue
                });
            }

            let files_changed = self.git.changed_files()?;
            ctx.diff_stat = self.git.diff_stat().ok();
            ctx.changed_files = files_changed.clone();

            let verify_outcome = verify::run_verify(&task.verify, &self.repo_root)?;

            if verify_outcome.passed {
                let commit_hash = self.git.commit(&commit_message(&task.id, &task.title))?;
                info!(task_id = %task.id, commit = %commit_hash, "committed");
                self.task_store.update_status(&task.id, Status::Completed)?;

                let end_time = chrono::Utc::now();
                self.record_store.append(&IterationRecord {
                    iteration_id,
                    task_id: task.id.clone(),
                    base_commit,
                    outcome: IterationOutcome::Success,
                    files_changed,
                    failure_signature: None,
                    attempt_number: attempt,
                    start_time,
                    end_time,
                })?;
                return Ok(IterationOutcomeSignal::Continue);
            }

            // Verification failed: working tree must not carry the failed
            // attempt's edits into the next SELECT regardless of whether
            // we retry or give up.
            self.git.hard_reset(&base_commit)?;

            if attempt < max_attempts {
                attempt += 1;
                ctx.failure_output = verify_outcome.failure_output;
                ctx.failure_signature = verify_outcome.failure_signature;
                ctx.user_feedback = self.state_dir.take_feedback(&task.id)?;
                continue;
            }

            self.task_store.update_status(&task.id, Status::Failed)?;
            let end_time = chrono::Utc::now();
            self.record_store.append(&IterationRecord {
                iteration_id,
                task_id: task.id.clone(),
                base_commit,
                outcome: IterationOutcome::VerificationFailed,
                files_changed,
                failure_signature: verify_outcome.failure_signature,
                attempt_number: attempt,
                start_time,
                end_time,
            })?;
            return Ok(IterationOutcomeSignal::Continue);
        }
    }
}

/// Deterministic-enough id for one iteration: task id plus a nanosecond
/// timestamp. Unique within a single-threaded, single-process loop since
/// no two iterations run concurrently.
fn make_iteration_id(task_id: &str, at: chrono::DateTime<chrono::Utc>) -> String {
    format!("{task_id}-{}", at.timestamp_nanos_opt().unwrap_or_default())
}
