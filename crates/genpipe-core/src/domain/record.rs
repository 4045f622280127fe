//! Append-only error records collected by the session log.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse error taxonomy used to group records into patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A validation call reported failing issues.
    ValidationFailed,
    /// Repair reported its issues as unresolvable.
    RepairUnresolved,
    /// Retry budget ran out with issues remaining; the artifact is degraded.
    BudgetExhausted,
    /// A collaborator call failed transiently and was retried.
    Transient,
    /// A collaborator call exceeded the per-call timeout.
    Timeout,
    /// A terminal consistency/feasibility check failed.
    TerminalCheckFailed,
    /// A non-retryable error that aborted the run.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "validation_failed",
            Self::RepairUnresolved => "repair_unresolved",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::TerminalCheckFailed => "terminal_check_failed",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable error observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub stage: String,
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ErrorRecord {
    pub fn new(
        run_id: impl Into<String>,
        stage: impl Into<String>,
        error_kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: run_id.into(),
            stage: stage.into(),
            error_kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}
