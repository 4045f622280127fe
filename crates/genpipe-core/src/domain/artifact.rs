//! Opaque stage outputs and the per-run artifact set.

use serde::{Deserialize, Serialize};

use crate::domain::digest::compute_digest;

/// The output of one stage. The engine never inspects `content`; it only
/// threads it forward to later stages, validators, and terminal checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Name of the stage that produced this artifact.
    pub stage: String,

    /// Stage-defined payload.
    pub content: serde_json::Value,
}

impl Artifact {
    pub fn new(stage: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            stage: stage.into(),
            content,
        }
    }

    /// Content digest, or `None` when the payload cannot be canonicalized.
    pub fn digest(&self) -> Option<String> {
        compute_digest(&self.content).ok()
    }

    /// Same stage, new payload.
    pub fn with_content(&self, content: serde_json::Value) -> Self {
        Self {
            stage: self.stage.clone(),
            content,
        }
    }
}

/// What a `generate` call hands back: the payload plus its estimated cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub content: serde_json::Value,

    /// Estimated cost of the call in the collaborator's billing unit (USD by convention).
    #[serde(default)]
    pub cost: f64,
}

impl Generation {
    pub fn new(content: serde_json::Value) -> Self {
        Self { content, cost: 0.0 }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
}

/// Every terminal artifact produced so far in a run, keyed by stage name and
/// kept in production order. Later stages may read any earlier entry, not
/// just the immediately previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSet {
    run_id: String,
    entries: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            entries: Vec::new(),
        }
    }

    /// Run this set belongs to. Stages may use it as a seed or correlation id.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Insert or replace the artifact for `artifact.stage`.
    pub fn insert(&mut self, artifact: Artifact) {
        match self.entries.iter_mut().find(|a| a.stage == artifact.stage) {
            Some(slot) => *slot = artifact,
            None => self.entries.push(artifact),
        }
    }

    pub fn get(&self, stage: &str) -> Option<&Artifact> {
        self.entries.iter().find(|a| a.stage == stage)
    }

    /// Most recently produced artifact.
    pub fn latest(&self) -> Option<&Artifact> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.entries.iter()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.entries.iter().map(|a| a.stage.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
