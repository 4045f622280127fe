//! Engine configuration.
//!
//! Loaded from JSON, validated once, then shared read-only by the
//! orchestrator and batch runner.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};

/// Per-run policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Regenerations allowed per stage unless overridden.
    pub default_max_retries: u32,

    /// Per-stage overrides keyed by stage name.
    pub stage_max_retries: BTreeMap<String, u32>,

    /// Consecutive local patches allowed within one generation attempt.
    pub max_patches_per_attempt: u32,

    /// Timeout applied to every collaborator call. `None` disables it.
    pub call_timeout_ms: Option<u64>,

    /// When `true`, a degraded intermediate stage fails the run verdict too;
    /// when `false`, only the final stage and the terminal checks count.
    pub require_all_stages_passed: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            stage_max_retries: BTreeMap::new(),
            max_patches_per_attempt: 3,
            call_timeout_ms: Some(120_000),
            require_all_stages_passed: true,
        }
    }
}

impl PipelineConfig {
    /// Resolve a stage's budget: config override, then the stage's own
    /// override, then the global default.
    pub fn max_retries_for(&self, stage: &str, stage_override: Option<u32>) -> u32 {
        self.stage_max_retries
            .get(stage)
            .copied()
            .or(stage_override)
            .unwrap_or(self.default_max_retries)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Batch-level policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Runs started by `BatchRunner::run_target`.
    pub target_runs_per_batch: usize,

    /// Runs executing at once. `1` is strictly sequential.
    pub concurrency_limit: usize,

    /// Pause between run starts, to respect upstream rate limits.
    pub inter_run_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            target_runs_per_batch: 10,
            concurrency_limit: 1,
            inter_run_delay_ms: 0,
        }
    }
}

impl BatchConfig {
    pub fn inter_run_delay(&self) -> Duration {
        Duration::from_millis(self.inter_run_delay_ms)
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    pub batch: BatchConfig,
}

impl EngineConfig {
    /// Read and validate a JSON config file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.concurrency_limit == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_patches_per_attempt == 0 {
            return Err(PipelineError::InvalidConfig(
                "pipeline.max_patches_per_attempt must be at least 1".to_string(),
            ));
        }
        if self.pipeline.call_timeout_ms == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "pipeline.call_timeout_ms must be non-zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.pipeline.default_max_retries, 3);
        assert_eq!(config.pipeline.max_patches_per_attempt, 3);
        assert_eq!(config.batch.concurrency_limit, 1);
        assert_eq!(config.batch.target_runs_per_batch, 10);
        assert!(config.pipeline.require_all_stages_passed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_retries_resolution_order() {
        let mut config = PipelineConfig::default();
        config.stage_max_retries.insert("rules".to_string(), 5);

        assert_eq!(config.max_retries_for("rules", Some(1)), 5);
        assert_eq!(config.max_retries_for("concept", Some(1)), 1);
        assert_eq!(config.max_retries_for("concept", None), 3);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = EngineConfig::default();
        config.batch.concurrency_limit = 0;
        let err = config.validate().expect_err("should reject");
        assert!(err.to_string().contains("concurrency_limit"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = EngineConfig::default();
        config.pipeline.call_timeout_ms = Some(0);
        assert!(config.validate().is_err());

        config.pipeline.call_timeout_ms = None;
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.call_timeout(), None);
    }

    #[test]
    fn test_from_json_file_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{ "pipeline": {{ "default_max_retries": 2, "stage_max_retries": {{ "assembly": 4 }} }}, "batch": {{ "concurrency_limit": 3 }} }}"#
        )
        .expect("write config");

        let config = EngineConfig::from_json_file(file.path()).expect("load config");
        assert_eq!(config.pipeline.default_max_retries, 2);
        assert_eq!(config.pipeline.max_retries_for("assembly", None), 4);
        assert_eq!(config.pipeline.max_patches_per_attempt, 3);
        assert_eq!(config.batch.concurrency_limit, 3);
        assert_eq!(config.batch.target_runs_per_batch, 10);
    }

    #[test]
    fn test_from_json_file_invalid_config() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, r#"{{ "batch": {{ "concurrency_limit": 0 }} }}"#).expect("write config");
        assert!(matches!(
            EngineConfig::from_json_file(file.path()),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
