//! In-memory fakes for the stage contracts (testing only).
//!
//! `ScriptedStage` plays back a script of generate/validate/repair results and
//! counts every call; `StaticCheck` returns a fixed terminal verdict.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::{
    Artifact, ArtifactSet, Generation, RepairOutcome, StageError, StageResult, ValidationResult,
};
use crate::stage::{Stage, TerminalCheck};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type Verdict = Arc<dyn Fn(&Artifact) -> ValidationResult + Send + Sync>;

/// How a `ScriptedStage` answers `validate`.
#[derive(Clone)]
pub enum ValidationScript {
    /// Same verdict every call.
    Always(ValidationResult),
    /// Verdicts in call order; passes once the list runs out.
    Sequence(Vec<ValidationResult>),
    /// Verdict computed from the artifact. Generated content carries
    /// `run_id` and `attempt`.
    Compute(Verdict),
}

impl ValidationScript {
    pub fn compute(f: impl Fn(&Artifact) -> ValidationResult + Send + Sync + 'static) -> Self {
        Self::Compute(Arc::new(f))
    }
}

impl fmt::Debug for ValidationScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always(v) => f.debug_tuple("Always").field(v).finish(),
            Self::Sequence(v) => f.debug_tuple("Sequence").field(&v.len()).finish(),
            Self::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

/// Stage that replays scripted results.
///
/// Generated content is `{"stage", "run_id", "attempt", "inputs", "feedback"}`
/// where `attempt` counts this stage's successful generations across all runs.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    validations: ValidationScript,
    validation_cursor: AtomicU32,
    repairs: Mutex<VecDeque<RepairOutcome>>,
    repair_enabled: bool,
    generate_errors: Mutex<VecDeque<Option<StageError>>>,
    generate_delay: Option<Duration>,
    panic_on_generate: bool,
    cost: f64,
    generate_calls: AtomicU32,
    generated: AtomicU32,
    validate_calls: AtomicU32,
    repair_calls: AtomicU32,
    feedback_seen: Mutex<Vec<Option<String>>>,
}

impl ScriptedStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            validations: ValidationScript::Always(ValidationResult::pass()),
            validation_cursor: AtomicU32::new(0),
            repairs: Mutex::new(VecDeque::new()),
            repair_enabled: false,
            generate_errors: Mutex::new(VecDeque::new()),
            generate_delay: None,
            panic_on_generate: false,
            cost: 0.0,
            generate_calls: AtomicU32::new(0),
            generated: AtomicU32::new(0),
            validate_calls: AtomicU32::new(0),
            repair_calls: AtomicU32::new(0),
            feedback_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_validations(mut self, script: ValidationScript) -> Self {
        self.validations = script;
        self
    }

    /// Enable repair and queue its outcomes. Once the queue is empty, repair
    /// requests regeneration with the formatted issues.
    pub fn with_repairs(mut self, outcomes: Vec<RepairOutcome>) -> Self {
        self.repairs = Mutex::new(outcomes.into());
        self.repair_enabled = true;
        self
    }

    /// Per-call generate failures; `None` entries succeed.
    pub fn with_generate_errors(mut self, errors: Vec<Option<StageError>>) -> Self {
        self.generate_errors = Mutex::new(errors.into());
        self
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = Some(delay);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Panic inside `generate`, to exercise task isolation.
    pub fn panicking(mut self) -> Self {
        self.panic_on_generate = true;
        self
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn validate_calls(&self) -> u32 {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn repair_calls(&self) -> u32 {
        self.repair_calls.load(Ordering::SeqCst)
    }

    /// Feedback passed to each `generate` call, in call order.
    pub fn feedback_seen(&self) -> Vec<Option<String>> {
        lock(&self.feedback_seen).clone()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, inputs: &ArtifactSet, feedback: Option<&str>) -> StageResult<Generation> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.feedback_seen).push(feedback.map(str::to_string));

        if let Some(delay) = self.generate_delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_generate {
            panic!("scripted panic in stage {}", self.name);
        }
        if let Some(Some(err)) = lock(&self.generate_errors).pop_front() {
            return Err(err);
        }

        let attempt = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Generation::new(json!({
            "stage": self.name,
            "run_id": inputs.run_id(),
            "attempt": attempt,
            "inputs": inputs.stage_names(),
            "feedback": feedback,
        }))
        .with_cost(self.cost))
    }

    async fn validate(&self, artifact: &Artifact) -> StageResult<ValidationResult> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let verdict = match &self.validations {
            ValidationScript::Always(v) => v.clone(),
            ValidationScript::Sequence(list) => {
                let i = self.validation_cursor.fetch_add(1, Ordering::SeqCst) as usize;
                list.get(i).cloned().unwrap_or_else(ValidationResult::pass)
            }
            ValidationScript::Compute(f) => f(artifact),
        };
        Ok(verdict)
    }

    fn supports_repair(&self) -> bool {
        self.repair_enabled
    }

    async fn repair(
        &self,
        _artifact: &Artifact,
        validation: &ValidationResult,
        _inputs: &ArtifactSet,
    ) -> StageResult<RepairOutcome> {
        self.repair_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.repairs)
            .pop_front()
            .unwrap_or_else(|| RepairOutcome::RegenerationRequired {
                feedback: validation.format_feedback(),
            }))
    }
}

/// Terminal check with a fixed verdict.
#[derive(Debug)]
pub struct StaticCheck {
    name: String,
    verdict: StageResult<ValidationResult>,
    calls: AtomicU32,
}

impl StaticCheck {
    pub fn passing(name: impl Into<String>) -> Self {
        Self::with_verdict(name, Ok(ValidationResult::pass()))
    }

    pub fn failing(name: impl Into<String>, result: ValidationResult) -> Self {
        Self::with_verdict(name, Ok(result))
    }

    pub fn erroring(name: impl Into<String>, err: StageError) -> Self {
        Self::with_verdict(name, Err(err))
    }

    fn with_verdict(name: impl Into<String>, verdict: StageResult<ValidationResult>) -> Self {
        Self {
            name: name.into(),
            verdict,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TerminalCheck for StaticCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_final(&self, _artifacts: &ArtifactSet) -> StageResult<ValidationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict.clone()
    }
}
