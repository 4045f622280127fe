use genpipe_core::fakes::{ScriptedStage, ValidationScript};
use genpipe_core::{
    Artifact, ArtifactSet, ErrorKind, RepairOutcome, RetryBudget, SessionEventKind, SessionLog,
    StageRunner, TerminalReason, ValidationIssue, ValidationResult,
};
use serde_json::json;

fn failing(code: &str) -> ValidationResult {
    ValidationResult::fail(vec![ValidationIssue::error(code, format!("{code} is wrong"))])
}

#[tokio::test]
async fn validate_only_stage_makes_max_plus_one_generate_calls() {
    let stage = ScriptedStage::new("rules").with_validations(ValidationScript::Always(failing("no_goal")));
    let mut log = SessionLog::start_session("run-1");

    let (artifact, trace) = StageRunner::default()
        .run(&stage, &ArtifactSet::new("run-1"), RetryBudget::new(2), &mut log)
        .await
        .expect("runner returns an artifact");

    assert_eq!(stage.generate_calls(), 3);
    assert_eq!(trace.generation_calls, 3);
    // The third artifact is returned, invalid.
    assert_eq!(artifact.content["attempt"], json!(3));
    assert!(!trace.is_clean());
    assert!(trace.is_degraded());
    assert!(trace.budget.used() <= trace.budget.max());
    assert_eq!(trace.budget.used(), 2);
}

#[tokio::test]
async fn patched_first_failure_costs_no_budget() {
    let stage = ScriptedStage::new("rules")
        .with_validations(ValidationScript::Sequence(vec![failing("no_goal")]))
        .with_repairs(vec![RepairOutcome::Patched {
            artifact: Artifact::new("rules", json!({ "goal": "escape" })),
            applied_actions: vec!["insert_goal".to_string()],
        }]);
    let mut log = SessionLog::start_session("run-1");

    let (artifact, trace) = StageRunner::default()
        .run(&stage, &ArtifactSet::new("run-1"), RetryBudget::new(3), &mut log)
        .await
        .expect("run");

    assert_eq!(stage.generate_calls(), 1);
    assert_eq!(stage.validate_calls(), 2);
    assert_eq!(stage.repair_calls(), 1);
    assert_eq!(trace.budget.used(), 0);
    assert!(trace.passed());
    assert!(!trace.is_clean());
    assert_eq!(artifact.content["goal"], json!("escape"));
    assert_eq!(log.events_of_kind(SessionEventKind::Patched).count(), 1);
}

#[tokio::test]
async fn regeneration_request_consumes_budget_and_forwards_feedback() {
    let stage = ScriptedStage::new("assembly")
        .with_validations(ValidationScript::Sequence(vec![failing("broken_link")]))
        .with_repairs(vec![RepairOutcome::RegenerationRequired {
            feedback: "rebuild the room graph".to_string(),
        }]);
    let mut log = SessionLog::start_session("run-1");

    let (_, trace) = StageRunner::default()
        .run(&stage, &ArtifactSet::new("run-1"), RetryBudget::new(3), &mut log)
        .await
        .expect("run");

    assert_eq!(stage.generate_calls(), 2);
    assert_eq!(trace.budget.used(), 1);
    assert_eq!(
        stage.feedback_seen(),
        vec![None, Some("rebuild the room graph".to_string())]
    );
    assert_eq!(trace.terminal_reason(), Some(TerminalReason::Passed));
}

#[tokio::test]
async fn zero_budget_returns_first_artifact_without_repair() {
    let stage = ScriptedStage::new("concept")
        .with_validations(ValidationScript::Always(failing("too_short")))
        .with_repairs(vec![]);
    let mut log = SessionLog::start_session("run-1");

    let (_, trace) = StageRunner::default()
        .run(&stage, &ArtifactSet::new("run-1"), RetryBudget::new(0), &mut log)
        .await
        .expect("run");

    assert_eq!(stage.generate_calls(), 1);
    assert_eq!(stage.repair_calls(), 0);
    assert_eq!(trace.terminal_reason(), Some(TerminalReason::BudgetExhausted));
}

#[tokio::test]
async fn transient_then_exhaustion_keeps_last_invalid_artifact() {
    let stage = ScriptedStage::new("rules")
        .with_validations(ValidationScript::Always(failing("no_goal")))
        .with_generate_errors(vec![None, Some(genpipe_core::StageError::transient("rate limited"))]);
    let mut log = SessionLog::start_session("run-1");

    let (artifact, trace) = StageRunner::default()
        .run(&stage, &ArtifactSet::new("run-1"), RetryBudget::new(1), &mut log)
        .await
        .expect("degraded artifact, not an error");

    // First generation failed validation, the retry failed transiently.
    assert_eq!(stage.generate_calls(), 2);
    assert_eq!(artifact.content["attempt"], json!(1));
    assert_eq!(trace.terminal_reason(), Some(TerminalReason::BudgetExhausted));
    let kinds: Vec<ErrorKind> = log.get_errors().iter().map(|r| r.error_kind).collect();
    assert_eq!(
        kinds,
        vec![ErrorKind::ValidationFailed, ErrorKind::Transient, ErrorKind::BudgetExhausted]
    );
}

#[tokio::test]
async fn validation_failures_are_recorded_per_attempt() {
    let stage = ScriptedStage::new("rules").with_validations(ValidationScript::Always(failing("no_goal")));
    let mut log = SessionLog::start_session("run-1");

    StageRunner::default()
        .run(&stage, &ArtifactSet::new("run-1"), RetryBudget::new(2), &mut log)
        .await
        .expect("run");

    let validation_failures: Vec<_> = log
        .get_errors()
        .iter()
        .filter(|r| r.error_kind == ErrorKind::ValidationFailed)
        .collect();
    assert_eq!(validation_failures.len(), 3);
    assert_eq!(validation_failures[0].message, "no_goal: no_goal is wrong");
    assert_eq!(validation_failures[2].context["attempt"], json!(3));
    assert_eq!(log.events_of_kind(SessionEventKind::RegenerationRequested).count(), 2);
    assert_eq!(log.events_of_kind(SessionEventKind::BudgetExhausted).count(), 1);
}

#[tokio::test]
async fn pass_after_transient_retry_is_not_clean() {
    let stage = ScriptedStage::new("concept")
        .with_generate_errors(vec![Some(genpipe_core::StageError::transient("429"))]);
    let mut log = SessionLog::start_session("run-1");

    let (_, trace) = StageRunner::default()
        .run(&stage, &ArtifactSet::new("run-1"), RetryBudget::new(2), &mut log)
        .await
        .expect("run");

    assert!(trace.passed());
    assert_eq!(trace.len(), 1);
    assert_eq!(trace.generation_calls, 2);
    assert_eq!(trace.budget.used(), 1);
    assert!(!trace.is_clean());
}
