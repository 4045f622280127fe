//! Sequences the configured stages for one run and computes its verdict.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::budget::RetryBudget;
use crate::config::PipelineConfig;
use crate::domain::{
    ArtifactSet, AttemptTrace, ErrorKind, ErrorRecord, PipelineError, Result, RunResult,
    RunStatus, TerminalCheckResult,
};
use crate::obs;
use crate::runner::{timed, StageRunner};
use crate::session::{SessionEventKind, SessionLog, RUN_SCOPE};
use crate::stage::{StageSpec, TerminalCheck};

/// Per-run state machine.
///
/// `Idle -> Running(0) -> .. -> Running(n) -> Completed`, with `Failed`
/// reachable from any non-terminal state. `Running(stage_count)` is the
/// terminal-check pseudo-stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage_index")]
pub enum RunState {
    Idle,
    Running(usize),
    Completed,
    Failed,
}

impl RunState {
    /// Validate a move to `next`.
    pub fn transition(self, next: RunState) -> Result<RunState> {
        let legal = match (self, next) {
            (RunState::Idle, RunState::Running(0)) => true,
            (RunState::Idle, RunState::Completed) => true,
            (RunState::Running(i), RunState::Running(j)) => j == i + 1,
            (RunState::Running(_), RunState::Completed) => true,
            (RunState::Idle | RunState::Running(_), RunState::Failed) => true,
            _ => false,
        };
        if legal {
            Ok(next)
        } else {
            Err(PipelineError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Running(i) => write!(f, "running({})", i),
            RunState::Completed => f.write_str("completed"),
            RunState::Failed => f.write_str("failed"),
        }
    }
}

/// Mutable state threaded through one run.
struct RunProgress {
    state: RunState,
    artifacts: ArtifactSet,
    traces: Vec<AttemptTrace>,
    checks: Vec<TerminalCheckResult>,
    cost: f64,
}

impl RunProgress {
    fn new(run_id: &str) -> Self {
        Self {
            state: RunState::Idle,
            artifacts: ArtifactSet::new(run_id),
            traces: Vec::new(),
            checks: Vec::new(),
            cost: 0.0,
        }
    }

    fn advance(&mut self, next: RunState, log: &mut SessionLog) -> Result<()> {
        let from = self.state;
        self.state = from.transition(next)?;
        log.record(
            RUN_SCOPE,
            SessionEventKind::StateTransition,
            json!({ "from": from.to_string(), "to": next.to_string() }),
        );
        Ok(())
    }
}

/// Runs the fixed stage list, then the terminal checks, for one run at a time.
///
/// Holds no per-run state, so one orchestrator can serve concurrent runs.
pub struct PipelineOrchestrator {
    stages: Vec<StageSpec>,
    checks: Vec<Arc<dyn TerminalCheck>>,
    config: PipelineConfig,
    runner: StageRunner,
}

impl PipelineOrchestrator {
    /// Stage names must be unique: artifacts and traces are keyed by name.
    /// A pipeline built here with duplicates fails every run before its
    /// first stage; use [`PipelineOrchestrator::try_new`] to reject it up front.
    pub fn new(stages: Vec<StageSpec>, config: PipelineConfig) -> Self {
        let runner = StageRunner::from_config(&config);
        Self {
            stages,
            checks: Vec::new(),
            config,
            runner,
        }
    }

    /// Like [`PipelineOrchestrator::new`], but rejects duplicate stage names.
    pub fn try_new(stages: Vec<StageSpec>, config: PipelineConfig) -> Result<Self> {
        check_unique_names(&stages)?;
        Ok(Self::new(stages, config))
    }

    pub fn with_terminal_check(mut self, check: Arc<dyn TerminalCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run under a fresh run id.
    pub async fn execute_run(&self) -> (RunResult, SessionLog) {
        self.execute_run_with_id(Uuid::new_v4().to_string()).await
    }

    /// Execute one run. Never fails: fatal errors become a `Failed` result
    /// carrying whatever the run produced before the error. The returned
    /// session log is ended.
    pub async fn execute_run_with_id(&self, run_id: impl Into<String>) -> (RunResult, SessionLog) {
        let run_id = run_id.into();
        let started_at = Utc::now();
        let start = Instant::now();
        let mut log = SessionLog::start_session(&run_id);
        let mut progress = RunProgress::new(&run_id);

        obs::emit_run_started(&run_id, self.stages.len());

        let outcome = self
            .drive(&mut progress, &mut log)
            .instrument(obs::run_span(&run_id))
            .await;

        let error = match outcome {
            Ok(()) => None,
            Err(err) => {
                let kind = match err {
                    PipelineError::Timeout { .. } => ErrorKind::Timeout,
                    _ => ErrorKind::Fatal,
                };
                log.record_error(
                    ErrorRecord::new(&run_id, err.stage().unwrap_or(RUN_SCOPE), kind, err.to_string())
                        .with_context("state", json!(progress.state.to_string())),
                );
                if let Err(e) = progress.advance(RunState::Failed, &mut log) {
                    warn!(run_id = %run_id, error = %e, "could not mark run failed");
                    progress.state = RunState::Failed;
                }
                obs::emit_run_failed(&run_id, &err);
                Some(err.to_string())
            }
        };

        let status = if progress.state == RunState::Completed {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        let completed = status == RunStatus::Completed;

        let stages_ok = if self.config.require_all_stages_passed {
            progress.traces.iter().all(|t| t.passed())
        } else {
            progress.traces.last().map(|t| t.passed()).unwrap_or(true)
        };
        let checks_ok = progress.checks.iter().all(|c| c.result.passed);
        let passed = completed && stages_ok && checks_ok;
        let first_try_clean = completed && progress.traces.iter().all(|t| t.is_clean());

        let final_artifact = self
            .stages
            .last()
            .and_then(|s| progress.artifacts.get(s.name()))
            .cloned();
        let duration_ms = start.elapsed().as_millis() as u64;

        log.end_session(passed);
        obs::emit_run_finished(&run_id, duration_ms, passed, first_try_clean, progress.cost);

        let result = RunResult {
            run_id,
            status,
            final_artifact,
            artifacts: progress.artifacts,
            passed,
            first_try_clean,
            stage_traces: progress.traces,
            terminal_checks: progress.checks,
            error,
            started_at,
            duration_ms,
            estimated_cost: progress.cost,
        };
        (result, log)
    }

    async fn drive(&self, progress: &mut RunProgress, log: &mut SessionLog) -> Result<()> {
        let run_id = progress.artifacts.run_id().to_string();
        check_unique_names(&self.stages)?;

        for (index, spec) in self.stages.iter().enumerate() {
            progress.advance(RunState::Running(index), log)?;

            let max_retries = self.config.max_retries_for(spec.name(), spec.max_retries);
            let (artifact, trace) = self
                .runner
                .run(spec.stage.as_ref(), &progress.artifacts, RetryBudget::new(max_retries), log)
                .await?;

            let remaining = trace.last().map(|e| e.validation.error_count()).unwrap_or(0);
            log.record(
                spec.name(),
                SessionEventKind::StageCompleted,
                json!({
                    "passed": trace.passed(),
                    "terminal": trace.terminal_reason(),
                    "attempts": trace.len(),
                    "generation_calls": trace.generation_calls,
                    "budget_used": trace.budget.used(),
                    "remaining_issues": remaining,
                }),
            );
            match trace.terminal_reason() {
                Some(reason) if trace.is_degraded() => {
                    obs::emit_stage_degraded(&run_id, spec.name(), reason.as_str(), remaining);
                }
                _ => obs::emit_stage_completed(&run_id, spec.name(), trace.len(), trace.budget.used()),
            }

            progress.cost += trace.cost;
            progress.artifacts.insert(artifact);
            progress.traces.push(trace);
        }

        if !self.checks.is_empty() {
            progress.advance(RunState::Running(self.stages.len()), log)?;
            for check in &self.checks {
                let name = check.name().to_string();
                let result = timed(
                    self.config.call_timeout(),
                    &name,
                    "check_final",
                    check.check_final(&progress.artifacts),
                )
                .await?
                .map_err(|e| PipelineError::from_stage(&name, e))?;

                log.record(
                    &name,
                    SessionEventKind::TerminalCheck,
                    json!({ "passed": result.passed, "codes": result.codes() }),
                );
                if !result.passed {
                    let summary = result
                        .issues
                        .iter()
                        .map(|i| format!("{}: {}", i.code, i.message))
                        .collect::<Vec<_>>()
                        .join("; ");
                    log.record_error(
                        ErrorRecord::new(&run_id, &name, ErrorKind::TerminalCheckFailed, summary)
                            .with_context("codes", json!(result.codes())),
                    );
                }
                progress.checks.push(TerminalCheckResult { name, result });
            }
        }

        progress.advance(RunState::Completed, log)
    }
}

fn check_unique_names(stages: &[StageSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in stages {
        if !seen.insert(spec.name()) {
            return Err(PipelineError::InvalidConfig(format!(
                "duplicate stage name: {}",
                spec.name()
            )));
        }
    }
    Ok(())
}

impl fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("stages", &self.stages)
            .field(
                "checks",
                &self.checks.iter().map(|c| c.name().to_string()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish()
    }
}
