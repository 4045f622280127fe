//! Validation results and the tagged repair outcome.

use serde::{Deserialize, Serialize};

use crate::domain::artifact::Artifact;

/// Severity of a validation issue. Only `Error` issues fail validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A single finding reported by a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Stable machine-readable code (e.g. `missing_win_condition`).
    pub code: String,

    /// Human-readable message; also used as regeneration feedback.
    pub message: String,

    pub severity: Severity,
}

impl ValidationIssue {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

/// Output of a `validate` call or a terminal check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// A clean pass with no issues.
    pub fn pass() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
        }
    }

    /// Build a result from issues: passes iff no issue has `Error` severity.
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let passed = !issues.iter().any(|i| i.severity == Severity::Error);
        Self { passed, issues }
    }

    /// A failing result regardless of issue severities.
    pub fn fail(issues: Vec<ValidationIssue>) -> Self {
        Self {
            passed: false,
            issues,
        }
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn codes(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.code.as_str()).collect()
    }

    /// Render the issues as regeneration feedback, errors first.
    pub fn format_feedback(&self) -> String {
        let mut issues: Vec<&ValidationIssue> = self.issues.iter().collect();
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));

        let mut out = String::from("The previous output failed validation:\n");
        for issue in issues {
            let label = match issue.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            out.push_str(&format!("- [{}] {}: {}\n", label, issue.code, issue.message));
        }
        out
    }
}

/// Result of a stage's `repair` call. The variant decides what the runner does
/// next; there is no combination of flags to interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// Issues were fixed locally. Re-validated without a new generation call
    /// and without consuming retry budget.
    Patched {
        artifact: Artifact,
        applied_actions: Vec<String>,
    },

    /// The artifact must be discarded and regenerated with `feedback`.
    /// Consumes one retry-budget unit.
    RegenerationRequired { feedback: String },

    /// Repair gave up; the current artifact is kept as a degraded result.
    Unresolved {
        remaining_issues: Vec<ValidationIssue>,
    },
}

impl RepairOutcome {
    /// Short label used in session events and traces.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Patched { .. } => "patched",
            Self::RegenerationRequired { .. } => "regeneration_required",
            Self::Unresolved { .. } => "unresolved",
        }
    }
}
