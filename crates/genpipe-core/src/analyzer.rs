//! Ranks error records into de-duplicated patterns for feedback.
//!
//! Records are grouped by `(stage, error_kind)`. Groups keep their count and
//! the first few distinct messages, and are ordered by count with ties left
//! in first-seen order, so the same input always yields the same ranking.

use std::collections::HashMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{BatchResult, ErrorKind, ErrorRecord, PipelineError, Result, StageResult};
use crate::session::SessionLog;

/// Example messages kept per pattern.
pub const MAX_EXAMPLES: usize = 3;

/// One `(stage, error_kind)` group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub stage: String,
    pub error_kind: ErrorKind,
    pub count: usize,
    /// First-seen distinct messages, at most [`MAX_EXAMPLES`].
    pub examples: Vec<String>,
}

impl ErrorPattern {
    pub fn key(&self) -> (&str, ErrorKind) {
        (&self.stage, self.error_kind)
    }
}

/// External collaborator that turns ranked patterns into improvement
/// suggestions (for example, prompt amendments).
#[async_trait]
pub trait SuggestionGenerator: Send + Sync {
    async fn suggest(&self, patterns: &[ErrorPattern], prompt: &str) -> StageResult<Vec<String>>;
}

/// Immutable ranking built from committed error records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPatternAnalyzer {
    patterns: Vec<ErrorPattern>,
    total_records: usize,
}

impl ErrorPatternAnalyzer {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ErrorRecord>) -> Self {
        let mut patterns: Vec<ErrorPattern> = Vec::new();
        let mut index: HashMap<(String, ErrorKind), usize> = HashMap::new();
        let mut total_records = 0;

        for record in records {
            total_records += 1;
            let key = (record.stage.clone(), record.error_kind);
            let slot = *index.entry(key).or_insert_with(|| {
                patterns.push(ErrorPattern {
                    stage: record.stage.clone(),
                    error_kind: record.error_kind,
                    count: 0,
                    examples: Vec::new(),
                });
                patterns.len() - 1
            });

            let pattern = &mut patterns[slot];
            pattern.count += 1;
            if pattern.examples.len() < MAX_EXAMPLES && !pattern.examples.contains(&record.message) {
                pattern.examples.push(record.message.clone());
            }
        }

        // Stable sort: equal counts keep first-seen order.
        patterns.sort_by(|a, b| b.count.cmp(&a.count));

        Self {
            patterns,
            total_records,
        }
    }

    /// Aggregate the errors of ended sessions. Sessions still being written
    /// are skipped.
    pub fn from_sessions<'a>(sessions: impl IntoIterator<Item = &'a SessionLog>) -> Self {
        Self::from_records(
            sessions
                .into_iter()
                .filter(|s| s.is_ended())
                .flat_map(|s| s.get_errors().iter()),
        )
    }

    pub fn from_batch(batch: &BatchResult) -> Self {
        Self::from_sessions(&batch.sessions)
    }

    /// All patterns, most frequent first.
    pub fn patterns(&self) -> &[ErrorPattern] {
        &self.patterns
    }

    pub fn top_k(&self, k: usize) -> &[ErrorPattern] {
        &self.patterns[..k.min(self.patterns.len())]
    }

    pub fn total_records(&self) -> usize {
        self.total_records
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Render the top `k` patterns as plain text for a suggestion generator.
    pub fn feedback_prompt(&self, k: usize) -> String {
        let top = self.top_k(k);
        if top.is_empty() {
            return "No pipeline errors were recorded.".to_string();
        }

        let mut out = format!(
            "Most frequent pipeline errors ({} of {} patterns, {} records):\n",
            top.len(),
            self.patterns.len(),
            self.total_records
        );
        for (rank, pattern) in top.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. [{}] {} x{}",
                rank + 1,
                pattern.stage,
                pattern.error_kind,
                pattern.count
            );
            for example in &pattern.examples {
                let _ = writeln!(out, "   - {}", example);
            }
        }
        out
    }

    /// Hand the top `k` patterns to `generator`.
    pub async fn request_suggestions(
        &self,
        generator: &dyn SuggestionGenerator,
        k: usize,
    ) -> Result<Vec<String>> {
        let prompt = self.feedback_prompt(k);
        generator
            .suggest(self.top_k(k), &prompt)
            .await
            .map_err(|e| PipelineError::from_stage("suggestions", e))
    }
}
