//! Drives a single stage to a terminal artifact.
//!
//! The loop is bounded two ways:
//! - every generation after the first consumes one [`RetryBudget`] unit, so a
//!   stage makes at most `max + 1` generate calls;
//! - local patches are free but capped per generation attempt, after which
//!   the runner falls back to regeneration.
//!
//! The runner always returns an artifact unless a collaborator raises a
//! fatal error, times out, or never manages to produce anything at all.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, instrument};

use crate::budget::RetryBudget;
use crate::config::PipelineConfig;
use crate::domain::{
    Artifact, ArtifactSet, ArtifactSource, AttemptTrace, ErrorKind, ErrorRecord, PipelineError,
    RepairOutcome, Result, Severity, StageError, StageResult, TerminalReason, ValidationResult,
};
use crate::session::{SessionEventKind, SessionLog};
use crate::stage::Stage;

/// Executes one stage's generate/validate/repair contract under a budget.
#[derive(Debug, Clone)]
pub struct StageRunner {
    max_patches_per_attempt: u32,
    call_timeout: Option<Duration>,
}

impl Default for StageRunner {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl StageRunner {
    pub fn new(max_patches_per_attempt: u32, call_timeout: Option<Duration>) -> Self {
        Self {
            max_patches_per_attempt,
            call_timeout,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_patches_per_attempt, config.call_timeout())
    }

    /// Run `stage` until validation passes or the budget is exhausted.
    ///
    /// Returns the terminal artifact (possibly degraded) and its attempt trace.
    /// Fatal collaborator errors and timeouts propagate as `Err`.
    #[instrument(skip_all, fields(stage = %stage.name(), max_retries = budget.max()))]
    pub async fn run(
        &self,
        stage: &dyn Stage,
        inputs: &ArtifactSet,
        budget: RetryBudget,
        log: &mut SessionLog,
    ) -> Result<(Artifact, AttemptTrace)> {
        let name = stage.name().to_string();
        let run_id = inputs.run_id().to_string();
        let mut budget = budget;
        let mut trace = AttemptTrace::new(&name, budget);
        let mut feedback: Option<String> = None;
        let mut last_invalid: Option<Artifact> = None;
        let mut attempt = 0u32;

        log.record(
            &name,
            SessionEventKind::StageStarted,
            json!({ "max_retries": budget.max(), "supports_repair": stage.supports_repair() }),
        );

        'generation: loop {
            attempt += 1;
            trace.generation_calls += 1;

            let generated = self
                .call(&name, "generate", stage.generate(inputs, feedback.as_deref()))
                .await?;

            let mut artifact = match generated {
                Ok(generation) => {
                    trace.cost += generation.cost;
                    let artifact = Artifact::new(&name, generation.content);
                    log.record(
                        &name,
                        SessionEventKind::Generated,
                        json!({
                            "attempt": attempt,
                            "cost": generation.cost,
                            "digest": artifact.digest(),
                            "with_feedback": feedback.is_some(),
                        }),
                    );
                    artifact
                }
                Err(StageError::Transient(message)) => {
                    log.record(
                        &name,
                        SessionEventKind::TransientError,
                        json!({ "attempt": attempt, "message": message }),
                    );
                    log.record_error(
                        ErrorRecord::new(&run_id, &name, ErrorKind::Transient, &message)
                            .with_context("attempt", json!(attempt)),
                    );

                    if budget.consume() {
                        debug!(attempt, used = budget.used(), "retrying after transient error");
                        continue 'generation;
                    }

                    return match last_invalid.take() {
                        Some(best) => {
                            self.exhausted(&name, &run_id, &mut trace, budget, log);
                            Ok((best, trace))
                        }
                        None => Err(PipelineError::TransientExhausted {
                            stage: name,
                            message,
                        }),
                    };
                }
                Err(err @ StageError::Fatal(_)) => {
                    return Err(PipelineError::from_stage(&name, err));
                }
            };

            let mut source = ArtifactSource::Generated;
            let mut patches = 0u32;

            loop {
                let validation = self
                    .call(&name, "validate", stage.validate(&artifact))
                    .await?
                    .map_err(|e| PipelineError::from_stage(&name, e))?;

                log.record(
                    &name,
                    SessionEventKind::Validated,
                    json!({
                        "attempt": attempt,
                        "source": source,
                        "passed": validation.passed,
                        "codes": validation.codes(),
                    }),
                );
                trace.push(attempt, source, validation.clone());

                if validation.passed {
                    trace.finish(TerminalReason::Passed, budget);
                    return Ok((artifact, trace));
                }

                log.record_error(
                    ErrorRecord::new(&run_id, &name, ErrorKind::ValidationFailed, summarize(&validation))
                        .with_context("attempt", json!(attempt))
                        .with_context("source", json!(source))
                        .with_context("codes", json!(validation.codes())),
                );

                if budget.is_exhausted() {
                    self.exhausted(&name, &run_id, &mut trace, budget, log);
                    return Ok((artifact, trace));
                }

                let outcome = if !stage.supports_repair() || patches >= self.max_patches_per_attempt {
                    RepairOutcome::RegenerationRequired {
                        feedback: validation.format_feedback(),
                    }
                } else {
                    trace.repair_calls += 1;
                    let outcome = self
                        .call(&name, "repair", stage.repair(&artifact, &validation, inputs))
                        .await?
                        .map_err(|e| PipelineError::from_stage(&name, e))?;
                    trace.set_repair(outcome.clone());
                    outcome
                };

                match outcome {
                    RepairOutcome::Patched {
                        artifact: patched,
                        applied_actions,
                    } => {
                        patches += 1;
                        log.record(
                            &name,
                            SessionEventKind::Patched,
                            json!({ "attempt": attempt, "applied_actions": applied_actions }),
                        );
                        artifact = Artifact::new(&name, patched.content);
                        source = ArtifactSource::Patched;
                    }
                    RepairOutcome::RegenerationRequired { feedback: next } => {
                        budget.consume();
                        log.record(
                            &name,
                            SessionEventKind::RegenerationRequested,
                            json!({
                                "attempt": attempt,
                                "budget_used": budget.used(),
                                "budget_max": budget.max(),
                            }),
                        );
                        last_invalid = Some(artifact);
                        feedback = Some(next);
                        continue 'generation;
                    }
                    RepairOutcome::Unresolved { remaining_issues } => {
                        trace.finish(TerminalReason::RepairUnresolved, budget);
                        let codes: Vec<&str> =
                            remaining_issues.iter().map(|i| i.code.as_str()).collect();
                        log.record(
                            &name,
                            SessionEventKind::RepairUnresolved,
                            json!({ "attempt": attempt, "remaining": codes }),
                        );
                        log.record_error(
                            ErrorRecord::new(
                                &run_id,
                                &name,
                                ErrorKind::RepairUnresolved,
                                format!("{} issue(s) could not be repaired", remaining_issues.len()),
                            )
                            .with_context("remaining", json!(codes)),
                        );
                        return Ok((artifact, trace));
                    }
                }
            }
        }
    }

    fn exhausted(
        &self,
        name: &str,
        run_id: &str,
        trace: &mut AttemptTrace,
        budget: RetryBudget,
        log: &mut SessionLog,
    ) {
        trace.finish(TerminalReason::BudgetExhausted, budget);
        log.record(
            name,
            SessionEventKind::BudgetExhausted,
            json!({ "budget_used": budget.used(), "generation_calls": trace.generation_calls }),
        );
        log.record_error(
            ErrorRecord::new(
                run_id,
                name,
                ErrorKind::BudgetExhausted,
                format!(
                    "retry budget of {} exhausted with issues remaining",
                    budget.max()
                ),
            )
            .with_context("generation_calls", json!(trace.generation_calls)),
        );
    }

    async fn call<T, F>(&self, stage: &str, operation: &str, fut: F) -> Result<StageResult<T>>
    where
        F: Future<Output = StageResult<T>>,
    {
        timed(self.call_timeout, stage, operation, fut).await
    }
}

/// Await a collaborator call under an optional timeout. The outer `Result`
/// carries only the timeout.
pub(crate) async fn timed<T, F>(
    limit: Option<Duration>,
    stage: &str,
    operation: &str,
    fut: F,
) -> Result<StageResult<T>>
where
    F: Future<Output = StageResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| PipelineError::Timeout {
                stage: stage.to_string(),
                operation: operation.to_string(),
                timeout_ms: limit.as_millis() as u64,
            }),
        None => Ok(fut.await),
    }
}

fn summarize(validation: &ValidationResult) -> String {
    let errors: Vec<String> = validation
        .issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .map(|i| format!("{}: {}", i.code, i.message))
        .collect();
    if errors.is_empty() {
        "validation failed".to_string()
    } else {
        errors.join("; ")
    }
}
