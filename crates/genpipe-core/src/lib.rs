//! genpipe core library
//!
//! Orchestration engine for multi-stage generation pipelines: each stage
//! generates an artifact, validates it, and repairs or regenerates under a
//! bounded retry budget. Runs are grouped into batches and their error
//! records ranked into patterns for feedback.

pub mod analyzer;
pub mod batch;
pub mod budget;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod obs;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod session;
pub mod stage;
pub mod telemetry;

pub use analyzer::{ErrorPattern, ErrorPatternAnalyzer, SuggestionGenerator, MAX_EXAMPLES};
pub use batch::{BatchProgress, BatchRunner, StopHandle};
pub use budget::RetryBudget;
pub use config::{BatchConfig, EngineConfig, PipelineConfig};
pub use domain::{
    Artifact, ArtifactSet, ArtifactSource, AttemptEntry, AttemptTrace, BatchResult, ErrorKind,
    ErrorRecord, Generation, PipelineError, RepairOutcome, Result, RunResult, RunStatus, Severity,
    StageError, StageResult, TerminalCheckResult, TerminalReason, ValidationIssue,
    ValidationResult,
};
pub use obs::{
    emit_batch_finished, emit_batch_started, emit_batch_stopped, emit_run_failed,
    emit_run_finished, emit_run_started, emit_stage_completed, emit_stage_degraded, RunSpan,
};
pub use orchestrator::{PipelineOrchestrator, RunState};
pub use report::{
    read_batch_report, render_batch_summary_md, write_batch_report, BatchReport,
    REPORT_SCHEMA_VERSION,
};
pub use runner::StageRunner;
pub use session::{SessionEvent, SessionEventKind, SessionLog, RUN_SCOPE};
pub use stage::{Stage, StageSpec, TerminalCheck};
pub use telemetry::init_tracing;

/// Crate version, for reports and `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
