//! Structured observability hooks for run and batch lifecycle events.
//!
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for run start/finish, stage completion, and batch progress
//!
//! Events are emitted at `info!` level, degraded stages at `warn!`.
//! Filtering follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // tracing calls below are associated with run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("genpipe.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Span for a run, for instrumenting futures that cross await points.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("genpipe.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, stage_count: usize) {
    info!(event = "run.started", run_id = %run_id, stage_count = stage_count);
}

/// Emit event: run finished with verdict and cost.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, passed: bool, first_try_clean: bool, cost: f64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        passed = passed,
        first_try_clean = first_try_clean,
        cost = cost,
    );
}

/// Emit event: run aborted by a fatal error (warning level).
pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}

pub fn emit_stage_completed(run_id: &str, stage: &str, attempts: usize, budget_used: u32) {
    info!(
        event = "stage.completed",
        run_id = %run_id,
        stage = %stage,
        attempts = attempts,
        budget_used = budget_used,
    );
}

/// Emit event: stage ended with issues remaining; the run continues with
/// the degraded artifact.
pub fn emit_stage_degraded(run_id: &str, stage: &str, reason: &str, remaining_issues: usize) {
    warn!(
        event = "stage.degraded",
        run_id = %run_id,
        stage = %stage,
        reason = %reason,
        remaining_issues = remaining_issues,
    );
}

pub fn emit_batch_started(batch_id: &str, target_runs: usize, concurrency: usize) {
    info!(
        event = "batch.started",
        batch_id = %batch_id,
        target_runs = target_runs,
        concurrency = concurrency,
    );
}

pub fn emit_batch_finished(batch_id: &str, runs: usize, passed: usize, duration_ms: u64) {
    info!(
        event = "batch.finished",
        batch_id = %batch_id,
        runs = runs,
        passed = passed,
        duration_ms = duration_ms,
    );
}

pub fn emit_batch_stopped(batch_id: &str, completed: usize, target_runs: usize) {
    warn!(
        event = "batch.stopped",
        batch_id = %batch_id,
        completed = completed,
        target_runs = target_runs,
    );
}
