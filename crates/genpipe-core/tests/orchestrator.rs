use std::sync::Arc;
use std::time::Duration;

use genpipe_core::fakes::{ScriptedStage, StaticCheck, ValidationScript};
use genpipe_core::{
    ErrorKind, PipelineConfig, PipelineError, PipelineOrchestrator, RunStatus, SessionEventKind, StageError,
    StageSpec, ValidationIssue, ValidationResult,
};
use serde_json::json;

fn failing(code: &str) -> ValidationResult {
    ValidationResult::fail(vec![ValidationIssue::error(code, "broken")])
}

fn three_stages() -> (Arc<ScriptedStage>, Arc<ScriptedStage>, Arc<ScriptedStage>) {
    (
        Arc::new(ScriptedStage::new("concept").with_cost(0.25)),
        Arc::new(ScriptedStage::new("rules").with_cost(0.5)),
        Arc::new(ScriptedStage::new("assembly").with_cost(0.25)),
    )
}

fn specs(stages: &(Arc<ScriptedStage>, Arc<ScriptedStage>, Arc<ScriptedStage>)) -> Vec<StageSpec> {
    vec![
        StageSpec::new(stages.0.clone()),
        StageSpec::new(stages.1.clone()),
        StageSpec::new(stages.2.clone()),
    ]
}

#[tokio::test]
async fn clean_run_passes_first_try_and_threads_artifacts() {
    let stages = three_stages();
    let consistency = Arc::new(StaticCheck::passing("consistency"));
    let orchestrator = PipelineOrchestrator::new(specs(&stages), PipelineConfig::default())
        .with_terminal_check(consistency.clone())
        .with_terminal_check(Arc::new(StaticCheck::passing("feasibility")));

    let (result, log) = orchestrator.execute_run_with_id("run-1").await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.passed);
    assert!(result.first_try_clean);
    assert_eq!(result.artifacts.len(), 3);
    assert_eq!(result.stage_traces.len(), 3);
    assert_eq!(result.terminal_checks.len(), 2);
    assert_eq!(consistency.calls(), 1);
    assert!((result.estimated_cost - 1.0).abs() < f64::EPSILON);

    let final_artifact = result.final_artifact.expect("final artifact");
    assert_eq!(final_artifact.stage, "assembly");
    // The last stage sees every earlier artifact, not only the previous one.
    assert_eq!(final_artifact.content["inputs"], json!(["concept", "rules"]));

    assert!(log.is_ended());
    assert_eq!(log.passed(), Some(true));
    assert!(log.get_errors().is_empty());
}

#[tokio::test]
async fn degraded_stage_completes_run_but_fails_verdict() {
    let concept = Arc::new(ScriptedStage::new("concept"));
    let rules = Arc::new(ScriptedStage::new("rules").with_validations(ValidationScript::Always(failing("no_goal"))));
    let assembly = Arc::new(ScriptedStage::new("assembly"));
    let stages = vec![
        StageSpec::new(concept),
        StageSpec::new(rules.clone()).with_max_retries(1),
        StageSpec::new(assembly.clone()),
    ];

    let (result, log) = PipelineOrchestrator::new(stages, PipelineConfig::default())
        .execute_run()
        .await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(!result.passed);
    assert!(!result.first_try_clean);
    assert_eq!(result.degraded_stages(), vec!["rules"]);
    assert_eq!(rules.generate_calls(), 2);
    assert_eq!(assembly.generate_calls(), 1);
    assert!(log
        .get_errors()
        .iter()
        .any(|r| r.stage == "rules" && r.error_kind == ErrorKind::BudgetExhausted));
}

#[tokio::test]
async fn final_stage_verdict_mode_ignores_degraded_intermediate_stage() {
    let stages = vec![
        StageSpec::new(Arc::new(
            ScriptedStage::new("rules").with_validations(ValidationScript::Always(failing("no_goal"))),
        )),
        StageSpec::new(Arc::new(ScriptedStage::new("assembly"))),
    ];
    let config = PipelineConfig {
        require_all_stages_passed: false,
        default_max_retries: 0,
        ..PipelineConfig::default()
    };

    let (result, _) = PipelineOrchestrator::new(stages, config).execute_run().await;

    assert!(result.passed);
    assert!(!result.first_try_clean);
}

#[tokio::test]
async fn failing_terminal_check_fails_verdict_and_is_recorded() {
    let stages = three_stages();
    let orchestrator = PipelineOrchestrator::new(specs(&stages), PipelineConfig::default())
        .with_terminal_check(Arc::new(StaticCheck::passing("consistency")))
        .with_terminal_check(Arc::new(StaticCheck::failing("feasibility", failing("unwinnable"))));

    let (result, log) = orchestrator.execute_run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(!result.passed);
    // Stages were clean; only the terminal check failed.
    assert!(result.first_try_clean);
    assert!(!result.terminal_checks[1].result.passed);

    let record = &log.get_errors()[0];
    assert_eq!(record.stage, "feasibility");
    assert_eq!(record.error_kind, ErrorKind::TerminalCheckFailed);
    assert_eq!(record.message, "unwinnable: broken");
}

#[tokio::test]
async fn fatal_error_aborts_run_and_skips_later_stages() {
    let concept = Arc::new(ScriptedStage::new("concept"));
    let rules = Arc::new(ScriptedStage::new("rules").with_generate_errors(vec![Some(StageError::fatal("quota revoked"))]));
    let assembly = Arc::new(ScriptedStage::new("assembly"));
    let stages = vec![
        StageSpec::new(concept),
        StageSpec::new(rules),
        StageSpec::new(assembly.clone()),
    ];

    let (result, log) = PipelineOrchestrator::new(stages, PipelineConfig::default())
        .execute_run_with_id("run-9")
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(!result.passed);
    assert!(!result.first_try_clean);
    assert!(result.final_artifact.is_none());
    assert_eq!(result.stage_traces.len(), 1);
    assert_eq!(result.artifacts.stage_names(), vec!["concept"]);
    assert_eq!(assembly.generate_calls(), 0);
    assert_eq!(
        result.error.as_deref(),
        Some("fatal error in stage rules: quota revoked")
    );

    let fatal = log.get_errors().last().expect("fatal record");
    assert_eq!(fatal.error_kind, ErrorKind::Fatal);
    assert_eq!(fatal.stage, "rules");
    assert_eq!(log.passed(), Some(false));

    let transitions: Vec<String> = log
        .events_of_kind(SessionEventKind::StateTransition)
        .map(|e| e.payload["to"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(transitions, vec!["running(0)", "running(1)", "failed"]);
}

#[tokio::test]
async fn erroring_terminal_check_is_fatal() {
    let stages = three_stages();
    let orchestrator = PipelineOrchestrator::new(specs(&stages), PipelineConfig::default())
        .with_terminal_check(Arc::new(StaticCheck::erroring("feasibility", StageError::fatal("simulator crashed"))));

    let (result, _) = orchestrator.execute_run().await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.final_artifact.is_some());
    assert!(result.terminal_checks.is_empty());
}

#[tokio::test]
async fn config_override_wins_over_stage_spec_override() {
    let rules = Arc::new(ScriptedStage::new("rules").with_validations(ValidationScript::Always(failing("no_goal"))));
    let mut config = PipelineConfig::default();
    config.stage_max_retries.insert("rules".to_string(), 1);

    let (result, _) = PipelineOrchestrator::new(
        vec![StageSpec::new(rules.clone()).with_max_retries(5)],
        config,
    )
    .execute_run()
    .await;

    assert_eq!(rules.generate_calls(), 2);
    assert_eq!(result.trace("rules").expect("trace").budget.max(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_aborts_only_the_run() {
    let slow = Arc::new(ScriptedStage::new("concept").with_generate_delay(Duration::from_secs(5)));
    let config = PipelineConfig {
        call_timeout_ms: Some(100),
        ..PipelineConfig::default()
    };

    let (result, log) = PipelineOrchestrator::new(vec![StageSpec::new(slow)], config)
        .execute_run()
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(log.get_errors()[0].error_kind, ErrorKind::Timeout);
    assert_eq!(
        result.error.as_deref(),
        Some("stage concept generate timed out after 100ms")
    );
}

#[tokio::test]
async fn empty_pipeline_completes() {
    let (result, log) = PipelineOrchestrator::new(Vec::new(), PipelineConfig::default())
        .execute_run()
        .await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.passed);
    assert!(result.final_artifact.is_none());
    assert!(log.is_ended());
}

#[tokio::test]
async fn transient_retry_passes_but_is_not_first_try_clean() {
    let concept = ScriptedStage::new("concept")
        .with_generate_errors(vec![Some(StageError::transient("429"))]);
    let orchestrator =
        PipelineOrchestrator::new(vec![StageSpec::new(Arc::new(concept))], PipelineConfig::default());

    let (result, _) = orchestrator.execute_run_with_id("run-1").await;

    assert!(result.passed);
    assert!(!result.first_try_clean);
}

#[tokio::test]
async fn duplicate_stage_names_are_rejected() {
    let first = Arc::new(ScriptedStage::new("rules"));
    let second = Arc::new(ScriptedStage::new("rules"));
    let stages = || vec![StageSpec::new(first.clone()), StageSpec::new(second.clone())];

    let err = PipelineOrchestrator::try_new(stages(), PipelineConfig::default()).expect_err("duplicate");
    assert!(matches!(err, PipelineError::InvalidConfig(ref msg) if msg.contains("rules")));

    let (result, log) = PipelineOrchestrator::new(stages(), PipelineConfig::default())
        .execute_run_with_id("run-1")
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.stage_traces.is_empty());
    assert_eq!(first.generate_calls() + second.generate_calls(), 0);
    assert_eq!(log.get_errors()[0].stage, "run");
}
