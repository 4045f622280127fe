//! Deterministic demo pipeline: `concept -> rules -> assembly`, plus
//! `consistency` and `feasibility` terminal checks.
//!
//! No external generator is involved. The run number (the `-NNNN` suffix the
//! batch runner puts on run ids) decides which faults a run sees, with
//! `fail_every = m`:
//! - every m-th run: `rules` is generated without a goal (patched locally)
//! - every 2m-th run: `rules` also contradicts itself (needs regeneration)
//! - every 3m-th run: `assembly` keeps an unreachable room (budget runs out)
//!
//! `fail_every = 0` disables all faults.

use std::sync::Arc;

use async_trait::async_trait;
use genpipe_core::{
    Artifact, ArtifactSet, Generation, PipelineConfig, PipelineOrchestrator, RepairOutcome, Stage,
    StageResult, StageSpec, TerminalCheck, ValidationIssue, ValidationResult,
};
use serde_json::json;

const GENERATION_COST: f64 = 0.01;

fn run_number(run_id: &str) -> u64 {
    run_id
        .rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// `true` when run `n` should see a fault scheduled every `period` runs.
fn faulty(n: u64, period: u64) -> bool {
    period > 0 && n > 0 && n % period == 0
}

pub fn pipeline(config: PipelineConfig, fail_every: u64) -> PipelineOrchestrator {
    let stages = vec![
        StageSpec::new(Arc::new(ConceptStage)),
        StageSpec::new(Arc::new(RulesStage { fail_every })),
        StageSpec::new(Arc::new(AssemblyStage { fail_every })),
    ];
    PipelineOrchestrator::new(stages, config)
        .with_terminal_check(Arc::new(ConsistencyCheck))
        .with_terminal_check(Arc::new(FeasibilityCheck))
}

struct ConceptStage;

#[async_trait]
impl Stage for ConceptStage {
    fn name(&self) -> &str {
        "concept"
    }

    async fn generate(&self, inputs: &ArtifactSet, _feedback: Option<&str>) -> StageResult<Generation> {
        let n = run_number(inputs.run_id());
        Ok(Generation::new(json!({
            "title": format!("Demo Adventure #{}", n),
            "theme": if n % 2 == 0 { "haunted lighthouse" } else { "sunken library" },
        }))
        .with_cost(GENERATION_COST))
    }

    async fn validate(&self, artifact: &Artifact) -> StageResult<ValidationResult> {
        let mut issues = Vec::new();
        if artifact.content["title"].as_str().map_or(true, str::is_empty) {
            issues.push(ValidationIssue::error("missing_title", "concept has no title"));
        }
        Ok(ValidationResult::from_issues(issues))
    }
}

struct RulesStage {
    fail_every: u64,
}

#[async_trait]
impl Stage for RulesStage {
    fn name(&self) -> &str {
        "rules"
    }

    async fn generate(&self, inputs: &ArtifactSet, feedback: Option<&str>) -> StageResult<Generation> {
        let n = run_number(inputs.run_id());
        let first_try = feedback.is_none();
        let goal = if first_try && faulty(n, self.fail_every) {
            serde_json::Value::Null
        } else {
            json!("reach the exit")
        };
        Ok(Generation::new(json!({
            "goal": goal,
            "contradiction": first_try && faulty(n, self.fail_every.saturating_mul(2)),
            "moves": ["look", "take", "go"],
        }))
        .with_cost(GENERATION_COST))
    }

    async fn validate(&self, artifact: &Artifact) -> StageResult<ValidationResult> {
        let mut issues = Vec::new();
        if artifact.content["goal"].is_null() {
            issues.push(ValidationIssue::error("missing_goal", "rules define no win condition"));
        }
        if artifact.content["contradiction"].as_bool().unwrap_or(false) {
            issues.push(ValidationIssue::error(
                "contradictory_rules",
                "two rules disagree on how doors open",
            ));
        }
        Ok(ValidationResult::from_issues(issues))
    }

    fn supports_repair(&self) -> bool {
        true
    }

    async fn repair(
        &self,
        artifact: &Artifact,
        validation: &ValidationResult,
        _inputs: &ArtifactSet,
    ) -> StageResult<RepairOutcome> {
        // Only a missing goal is patchable in place.
        if validation.codes() != ["missing_goal"] {
            return Ok(RepairOutcome::RegenerationRequired {
                feedback: validation.format_feedback(),
            });
        }
        let mut content = artifact.content.clone();
        content["goal"] = json!("reach the exit");
        Ok(RepairOutcome::Patched {
            artifact: artifact.with_content(content),
            applied_actions: vec!["insert_default_goal".to_string()],
        })
    }
}

/// Validate-only stage.
struct AssemblyStage {
    fail_every: u64,
}

#[async_trait]
impl Stage for AssemblyStage {
    fn name(&self) -> &str {
        "assembly"
    }

    async fn generate(&self, inputs: &ArtifactSet, _feedback: Option<&str>) -> StageResult<Generation> {
        let n = run_number(inputs.run_id());
        let title = inputs
            .get("concept")
            .and_then(|a| a.content["title"].as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Generation::new(json!({
            "title": title,
            "rooms": ["entrance", "hall", "exit"],
            "unreachable": faulty(n, self.fail_every.saturating_mul(3)),
        }))
        .with_cost(GENERATION_COST))
    }

    async fn validate(&self, artifact: &Artifact) -> StageResult<ValidationResult> {
        let mut issues = Vec::new();
        if artifact.content["unreachable"].as_bool().unwrap_or(false) {
            issues.push(ValidationIssue::error("unreachable_room", "exit cannot be reached from entrance"));
        }
        if artifact.content["rooms"].as_array().map_or(0, Vec::len) < 2 {
            issues.push(ValidationIssue::warning("tiny_map", "fewer than two rooms"));
        }
        Ok(ValidationResult::from_issues(issues))
    }
}

struct ConsistencyCheck;

#[async_trait]
impl TerminalCheck for ConsistencyCheck {
    fn name(&self) -> &str {
        "consistency"
    }

    async fn check_final(&self, artifacts: &ArtifactSet) -> StageResult<ValidationResult> {
        let concept = artifacts.get("concept").map(|a| &a.content["title"]);
        let assembly = artifacts.get("assembly").map(|a| &a.content["title"]);
        if concept.is_some() && concept == assembly {
            Ok(ValidationResult::pass())
        } else {
            Ok(ValidationResult::fail(vec![ValidationIssue::error(
                "title_mismatch",
                "assembled game does not carry the concept title",
            )]))
        }
    }
}

struct FeasibilityCheck;

#[async_trait]
impl TerminalCheck for FeasibilityCheck {
    fn name(&self) -> &str {
        "feasibility"
    }

    async fn check_final(&self, artifacts: &ArtifactSet) -> StageResult<ValidationResult> {
        let unreachable = artifacts
            .get("assembly")
            .and_then(|a| a.content["unreachable"].as_bool())
            .unwrap_or(true);
        if unreachable {
            Ok(ValidationResult::fail(vec![ValidationIssue::error(
                "unwinnable",
                "simulated playthrough never reaches the exit",
            )]))
        } else {
            Ok(ValidationResult::pass())
        }
    }
}
