//! Persisted batch report: the batch result plus its top error patterns.
//!
//! Layout under the report directory:
//! - `<batch_id>/batch.json`: pretty JSON [`BatchReport`]
//! - `<batch_id>/batch.digest`: SHA-256 hex of `batch.json`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::{ErrorPattern, ErrorPatternAnalyzer};
use crate::domain::digest::digest_bytes;
use crate::domain::{BatchResult, PipelineError};

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

const REPORT_FILE: &str = "batch.json";
const DIGEST_FILE: &str = "batch.digest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub batch: BatchResult,
    pub top_patterns: Vec<ErrorPattern>,
}

impl BatchReport {
    /// Snapshot `batch` together with its `top_k` error patterns.
    pub fn new(batch: BatchResult, top_k: usize) -> Self {
        let top_patterns = ErrorPatternAnalyzer::from_batch(&batch).top_k(top_k).to_vec();
        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            batch,
            top_patterns,
        }
    }
}

/// Write `<dir>/<batch_id>/batch.json` and its digest. Returns the JSON path.
pub fn write_batch_report(dir: &Path, report: &BatchReport) -> Result<PathBuf> {
    let batch_dir = dir.join(&report.batch.batch_id);
    std::fs::create_dir_all(&batch_dir).with_context(|| format!("create {:?}", batch_dir))?;

    let report_path = batch_dir.join(REPORT_FILE);
    let digest_path = batch_dir.join(DIGEST_FILE);
    let json = serde_json::to_vec_pretty(report).context("serialize batch report")?;
    let digest = digest_bytes(&json);

    std::fs::write(&report_path, &json).with_context(|| format!("write {:?}", report_path))?;
    std::fs::write(&digest_path, digest.as_bytes())
        .with_context(|| format!("write {:?}", digest_path))?;

    Ok(report_path)
}

/// Read a `batch.json` written by [`write_batch_report`], verifying it
/// against the sibling `batch.digest`.
pub fn read_batch_report(report_path: &Path) -> Result<BatchReport> {
    let digest_path = report_path.with_file_name(DIGEST_FILE);

    let json = std::fs::read(report_path).with_context(|| format!("read {:?}", report_path))?;
    let expected = std::fs::read_to_string(&digest_path)
        .with_context(|| format!("read {:?}", digest_path))?;
    let actual = digest_bytes(&json);
    if expected.trim() != actual {
        return Err(PipelineError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        }
        .into());
    }

    serde_json::from_slice(&json).with_context(|| format!("parse {:?}", report_path))
}

/// Render a Markdown summary for terminals and PR comments.
pub fn render_batch_summary_md(report: &BatchReport) -> String {
    let batch = &report.batch;
    let mut out = String::new();
    out.push_str("# Batch Summary\n\n");
    out.push_str(&format!("- batch: `{}`\n", batch.batch_id));
    out.push_str(&format!(
        "- runs: {} (passed {}, failed {}, aborted {})\n",
        batch.len(),
        batch.passed_count,
        batch.failed_count,
        batch.aborted_count()
    ));
    out.push_str(&format!("- pass rate: {:.1}%\n", batch.pass_rate() * 100.0));
    out.push_str(&format!(
        "- first-try clean: {}\n",
        batch.first_try_clean_count()
    ));
    out.push_str(&format!("- estimated cost: {:.4}\n", batch.total_cost));
    out.push_str(&format!("- duration: {}ms\n", batch.total_duration_ms));
    if batch.stopped_early {
        out.push_str("- stopped early: yes\n");
    }
    out.push('\n');

    out.push_str("## Runs\n");
    for run in &batch.runs {
        let verdict = if run.passed {
            "PASS"
        } else if run.is_failed() {
            "ABORTED"
        } else {
            "FAIL"
        };
        let degraded = run.degraded_stages();
        out.push_str(&format!(
            "- `{}` {} ({} generations",
            run.run_id,
            verdict,
            run.generation_calls()
        ));
        if !degraded.is_empty() {
            out.push_str(&format!(", degraded: {}", degraded.join(", ")));
        }
        out.push_str(")\n");
        if let Some(error) = &run.error {
            out.push_str(&format!("  - error: {}\n", error));
        }
    }
    out.push('\n');

    out.push_str("## Top Error Patterns\n");
    if report.top_patterns.is_empty() {
        out.push_str("- none\n");
    }
    for pattern in &report.top_patterns {
        out.push_str(&format!(
            "- **{}** / `{}`: {}\n",
            pattern.stage, pattern.error_kind, pattern.count
        ));
        for example in &pattern.examples {
            out.push_str(&format!("  - {}\n", example));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, ErrorRecord, RunResult};
    use crate::session::SessionLog;

    fn sample_report() -> BatchReport {
        let mut log = SessionLog::start_session("run-1");
        log.record_error(ErrorRecord::new("run-1", "rules", ErrorKind::ValidationFailed, "missing_goal: no goal"));
        log.end_session(false);
        let batch = BatchResult::from_runs(
            "batch-1",
            vec![RunResult::failed("run-1", "stage concept generate timed out after 50ms")],
            vec![log],
            42,
            false,
        );
        BatchReport::new(batch, 5)
    }

    #[test]
    fn test_report_includes_top_patterns() {
        let report = sample_report();
        assert_eq!(report.schema_version, REPORT_SCHEMA_VERSION);
        assert_eq!(report.top_patterns.len(), 1);
        assert_eq!(report.top_patterns[0].stage, "rules");
    }

    #[test]
    fn test_render_summary_md() {
        let md = render_batch_summary_md(&sample_report());
        assert!(md.starts_with("# Batch Summary"));
        assert!(md.contains("- runs: 1 (passed 0, failed 1, aborted 1)"));
        assert!(md.contains("`run-1` ABORTED"));
        assert!(md.contains("**rules** / `validation_failed`: 1"));
    }
}
