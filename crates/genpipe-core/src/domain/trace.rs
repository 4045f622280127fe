//! Per-stage attempt traces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::RetryBudget;
use crate::domain::validation::{RepairOutcome, ValidationResult};

/// Where the validated artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    Generated,
    Patched,
}

/// Why a stage stopped looping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// Validation passed.
    Passed,
    /// Retry budget ran out with issues remaining.
    BudgetExhausted,
    /// Repair reported the issues as unresolvable.
    RepairUnresolved,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::BudgetExhausted => "budget_exhausted",
            Self::RepairUnresolved => "repair_unresolved",
        }
    }
}

/// One validation observation within a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptEntry {
    /// 1-based generation attempt this validation belongs to. Patched
    /// re-validations share the number of the generation they patched.
    pub attempt_number: u32,

    pub source: ArtifactSource,

    pub validation: ValidationResult,

    /// Repair outcome applied after this validation, if any.
    pub repair: Option<RepairOutcome>,

    /// Set on the last entry only.
    pub terminal: Option<TerminalReason>,

    pub timestamp: DateTime<Utc>,
}

/// Ordered attempt history of one stage within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptTrace {
    pub stage: String,
    pub entries: Vec<AttemptEntry>,

    /// Number of `generate` calls issued, including ones that failed transiently.
    pub generation_calls: u32,

    /// Number of `repair` calls issued.
    pub repair_calls: u32,

    /// Budget state when the stage finished.
    pub budget: RetryBudget,

    /// Summed cost of successful generation calls.
    pub cost: f64,
}

impl AttemptTrace {
    pub fn new(stage: impl Into<String>, budget: RetryBudget) -> Self {
        Self {
            stage: stage.into(),
            entries: Vec::new(),
            generation_calls: 0,
            repair_calls: 0,
            budget,
            cost: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&AttemptEntry> {
        self.entries.last()
    }

    /// One `generate` call, one entry, and it passed. A transient retry
    /// leaves no entry but still counts as a second call.
    pub fn is_clean(&self) -> bool {
        self.generation_calls == 1 && self.entries.len() == 1 && self.entries[0].validation.passed
    }

    /// Last validation passed.
    pub fn passed(&self) -> bool {
        self.last().map(|e| e.validation.passed).unwrap_or(false)
    }

    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        self.last().and_then(|e| e.terminal)
    }

    /// Finished with issues remaining.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self.terminal_reason(),
            Some(TerminalReason::BudgetExhausted | TerminalReason::RepairUnresolved)
        )
    }

    pub(crate) fn push(&mut self, attempt_number: u32, source: ArtifactSource, validation: ValidationResult) {
        self.entries.push(AttemptEntry {
            attempt_number,
            source,
            validation,
            repair: None,
            terminal: None,
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn set_repair(&mut self, outcome: RepairOutcome) {
        if let Some(last) = self.entries.last_mut() {
            last.repair = Some(outcome);
        }
    }

    pub(crate) fn finish(&mut self, reason: TerminalReason, budget: RetryBudget) {
        if let Some(last) = self.entries.last_mut() {
            last.terminal = Some(reason);
        }
        self.budget = budget;
    }
}
