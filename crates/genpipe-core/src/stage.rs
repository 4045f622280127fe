//! Stage contracts consumed by the engine.
//!
//! A stage is an external collaborator: the engine only knows how to call
//! `generate`, `validate`, and (optionally) `repair`, never what they produce.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    Artifact, ArtifactSet, Generation, RepairOutcome, StageResult, ValidationResult,
};

/// Generate/validate/repair contract for one pipeline position.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name; also the key under which its artifact is stored.
    fn name(&self) -> &str;

    /// Produce a new artifact from all prior artifacts. `feedback` is `None` on
    /// the first attempt and carries regeneration feedback afterwards.
    async fn generate(
        &self,
        inputs: &ArtifactSet,
        feedback: Option<&str>,
    ) -> StageResult<Generation>;

    /// Check an artifact. Expected to be deterministic and side-effect free.
    async fn validate(&self, artifact: &Artifact) -> StageResult<ValidationResult>;

    /// Whether `repair` is implemented. Validate-only stages regenerate with
    /// the formatted validation issues as feedback.
    fn supports_repair(&self) -> bool {
        false
    }

    /// Classify failing issues into a local patch or a regeneration request.
    async fn repair(
        &self,
        _artifact: &Artifact,
        validation: &ValidationResult,
        _inputs: &ArtifactSet,
    ) -> StageResult<RepairOutcome> {
        Ok(RepairOutcome::RegenerationRequired {
            feedback: validation.format_feedback(),
        })
    }
}

/// Check run once per run over the complete artifact set (end-to-end
/// consistency, feasibility simulation, ...). Has no retry budget.
#[async_trait]
pub trait TerminalCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check_final(&self, artifacts: &ArtifactSet) -> StageResult<ValidationResult>;
}

/// A configured pipeline position: the stage plus an optional retry override.
#[derive(Clone)]
pub struct StageSpec {
    pub stage: Arc<dyn Stage>,

    /// Overrides the pipeline default unless the config names this stage.
    pub max_retries: Option<u32>,
}

impl StageSpec {
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            stage,
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn name(&self) -> &str {
        self.stage.name()
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.stage.name())
            .field("supports_repair", &self.stage.supports_repair())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
