//! Value types passed between the engine's components.
//!
//! - `Artifact` / `ArtifactSet` / `Generation`: opaque stage outputs
//! - `ValidationResult` / `RepairOutcome`: validator and repair verdicts
//! - `AttemptTrace`: per-stage attempt history
//! - `ErrorRecord`: append-only error observations
//! - `RunResult` / `BatchResult`: run and batch aggregates

pub mod artifact;
pub mod digest;
pub mod error;
pub mod record;
pub mod result;
pub mod trace;
pub mod validation;

pub use artifact::{Artifact, ArtifactSet, Generation};
pub use error::{PipelineError, Result, StageError, StageResult};
pub use record::{ErrorKind, ErrorRecord};
pub use result::{BatchResult, RunResult, RunStatus, TerminalCheckResult};
pub use trace::{ArtifactSource, AttemptEntry, AttemptTrace, TerminalReason};
pub use validation::{RepairOutcome, Severity, ValidationIssue, ValidationResult};
