//! Run and batch results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::artifact::{Artifact, ArtifactSet};
use crate::domain::trace::AttemptTrace;
use crate::domain::validation::ValidationResult;
use crate::session::SessionLog;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage produced an artifact (possibly degraded).
    Completed,
    /// A fatal error aborted the run.
    Failed,
}

/// Outcome of one named terminal check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalCheckResult {
    pub name: String,
    pub result: ValidationResult,
}

/// Result of one pipeline run. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,

    /// Output of the last stage, if the run got that far.
    pub final_artifact: Option<Artifact>,

    /// Every artifact produced, by stage.
    pub artifacts: ArtifactSet,

    /// Final assembly valid and every terminal check passed.
    pub passed: bool,

    /// Every stage validated cleanly on its first generation.
    pub first_try_clean: bool,

    pub stage_traces: Vec<AttemptTrace>,
    pub terminal_checks: Vec<TerminalCheckResult>,

    /// Fatal error message for `Failed` runs.
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub estimated_cost: f64,
}

impl RunResult {
    /// A failed result with no artifacts, for runs that never produced one
    /// (e.g. a panicked task).
    pub fn failed(run_id: impl Into<String>, error: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self {
            artifacts: ArtifactSet::new(run_id.clone()),
            run_id,
            status: RunStatus::Failed,
            final_artifact: None,
            passed: false,
            first_try_clean: false,
            stage_traces: Vec::new(),
            terminal_checks: Vec::new(),
            error: Some(error.into()),
            started_at: Utc::now(),
            duration_ms: 0,
            estimated_cost: 0.0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// Names of stages that finished with issues remaining.
    pub fn degraded_stages(&self) -> Vec<&str> {
        self.stage_traces
            .iter()
            .filter(|t| t.is_degraded())
            .map(|t| t.stage.as_str())
            .collect()
    }

    pub fn trace(&self, stage: &str) -> Option<&AttemptTrace> {
        self.stage_traces.iter().find(|t| t.stage == stage)
    }

    pub fn generation_calls(&self) -> u32 {
        self.stage_traces.iter().map(|t| t.generation_calls).sum()
    }
}

/// Aggregate of a batch of independent runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,

    /// Runs in start order.
    pub runs: Vec<RunResult>,

    pub passed_count: usize,
    pub failed_count: usize,

    /// Wall-clock duration of the whole batch.
    pub total_duration_ms: u64,
    pub total_cost: f64,

    /// `true` when a stop request ended the batch before its target.
    pub stopped_early: bool,

    /// Ended session logs, one per run, in the same order as `runs`.
    pub sessions: Vec<SessionLog>,
}

impl BatchResult {
    /// Fold finished runs into a batch aggregate.
    pub fn from_runs(
        batch_id: impl Into<String>,
        runs: Vec<RunResult>,
        sessions: Vec<SessionLog>,
        total_duration_ms: u64,
        stopped_early: bool,
    ) -> Self {
        let (passed_count, total_cost) = runs.iter().fold((0usize, 0.0f64), |(p, c), r| {
            (p + usize::from(r.passed), c + r.estimated_cost)
        });
        let failed_count = runs.len() - passed_count;

        Self {
            batch_id: batch_id.into(),
            runs,
            passed_count,
            failed_count,
            total_duration_ms,
            total_cost,
            stopped_early,
            sessions,
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Fraction of runs that passed; 0.0 for an empty batch.
    pub fn pass_rate(&self) -> f64 {
        if self.runs.is_empty() {
            return 0.0;
        }
        self.passed_count as f64 / self.runs.len() as f64
    }

    pub fn first_try_clean_count(&self) -> usize {
        self.runs.iter().filter(|r| r.first_try_clean).count()
    }

    /// Runs aborted by a fatal error (a subset of `failed_count`).
    pub fn aborted_count(&self) -> usize {
        self.runs.iter().filter(|r| r.is_failed()).count()
    }
}
