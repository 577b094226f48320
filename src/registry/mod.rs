//! Model registry and promotion gate
//!
//! The registry is a JSON list of entries with at most one `active` entry per
//! region. It is only ever replaced whole: the new list is written to a
//! temporary file that is then renamed over the old one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::ml::training::{CandidateMetrics, ModelCandidate};
use crate::ml::{FeatureSet, ModelType};

pub mod cleanup;

pub use cleanup::{cleanup_artifacts, CleanupReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub region_id: String,
    pub artifact_reference: String,
    pub model_type: ModelType,
    pub feature_set: FeatureSet,
    pub model_version: String,
    pub status: EntryStatus,
    pub trained_at: DateTime<Utc>,
    pub promoted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    pub metrics: CandidateMetrics,
}

impl RegistryEntry {
    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }

    fn from_candidate(candidate: &ModelCandidate, promoted_at: DateTime<Utc>) -> Self {
        Self {
            region_id: candidate.region_id.clone(),
            artifact_reference: candidate.artifact_reference.clone(),
            model_type: candidate.model_type,
            feature_set: candidate.feature_set,
            model_version: model_version(candidate),
            status: EntryStatus::Active,
            trained_at: candidate.trained_at,
            promoted_at,
            archived_at: None,
            metrics: candidate.metrics,
        }
    }
}

/// Version tag stamped on forecasts produced by a promoted model.
pub fn model_version(candidate: &ModelCandidate) -> String {
    format!(
        "{}-{}-{}",
        candidate.model_type,
        candidate.feature_set,
        candidate.trained_at.format("%Y%m%d%H%M%S")
    )
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    pub entries: Vec<RegistryEntry>,
}

impl Registry {
    /// Read and validate the registry file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::RegistryMissing(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(path, &text)
    }

    /// Like [`Registry::load`], but a missing file is an empty registry.
    pub fn load_or_empty(path: &Path) -> PipelineResult<Self> {
        match Self::load(path) {
            Err(PipelineError::RegistryMissing(_)) => Ok(Self::default()),
            other => other,
        }
    }

    fn parse(path: &Path, text: &str) -> PipelineResult<Self> {
        let corrupt = |reason: String| PipelineError::RegistryCorrupt {
            path: path.to_path_buf(),
            reason,
        };
        let value: Value = serde_json::from_str(text).map_err(|e| corrupt(e.to_string()))?;
        let Value::Array(items) = value else {
            return Err(corrupt(format!("expected a list of entries, got {}", json_kind(&value))));
        };

        let mut entries = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let entry: RegistryEntry =
                serde_json::from_value(item).map_err(|e| corrupt(format!("entry {index}: {e}")))?;
            entries.push(entry);
        }

        let mut active = HashSet::new();
        for entry in entries.iter().filter(|e| e.is_active()) {
            if !active.insert(entry.region_id.as_str()) {
                return Err(corrupt(format!(
                    "region {} has more than one active entry",
                    entry.region_id
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn active(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter().filter(|e| e.is_active())
    }

    pub fn active_for(&self, region_id: &str) -> Option<&RegistryEntry> {
        self.active().find(|e| e.region_id == region_id)
    }

    /// Replace the region's active entry, archiving the previous one.
    pub fn promote(&mut self, entry: RegistryEntry) {
        let now = entry.promoted_at;
        for existing in self
            .entries
            .iter_mut()
            .filter(|e| e.region_id == entry.region_id && e.is_active())
        {
            existing.status = EntryStatus::Archived;
            existing.archived_at = Some(now);
        }
        self.entries.push(entry);
        self.entries
            .sort_by(|a, b| (&a.region_id, a.promoted_at).cmp(&(&b.region_id, b.promoted_at)));
    }

    /// Write to `<path>.tmp` and rename over `path`.
    pub fn save_atomic(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = tmp_path(path);
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// model_error >= baseline_error
    NotBetterThanBaseline { mae: f64, baseline_mae: f64 },
    /// Metrics are NaN or infinite
    InvalidMetrics,
    /// The artifact is already the region's active model
    AlreadyActive,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::NotBetterThanBaseline { mae, baseline_mae } => {
                write!(f, "model_error {mae} >= baseline_error {baseline_mae}")
            }
            RejectionReason::InvalidMetrics => write!(f, "non-finite metrics"),
            RejectionReason::AlreadyActive => write!(f, "artifact already active"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub region_id: String,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromotionReport {
    pub promoted: Vec<String>,
    pub rejected: Vec<Rejection>,
    pub registry_written: bool,
    pub active_count: usize,
}

/// Gate decision for a single candidate.
pub fn evaluate(candidate: &ModelCandidate, registry: &Registry) -> Result<(), RejectionReason> {
    let CandidateMetrics { mae, baseline_mae, .. } = candidate.metrics;
    if !mae.is_finite() || !baseline_mae.is_finite() {
        return Err(RejectionReason::InvalidMetrics);
    }
    if registry
        .active_for(&candidate.region_id)
        .is_some_and(|e| e.artifact_reference == candidate.artifact_reference)
    {
        return Err(RejectionReason::AlreadyActive);
    }
    if mae < baseline_mae {
        Ok(())
    } else {
        Err(RejectionReason::NotBetterThanBaseline { mae, baseline_mae })
    }
}

/// Reads the candidate summary and applies the gate to the registry.
pub struct PromotionGate {
    registry_path: PathBuf,
    candidates_path: PathBuf,
}

impl PromotionGate {
    pub fn new(registry_path: impl Into<PathBuf>, candidates_path: impl Into<PathBuf>) -> Self {
        Self {
            registry_path: registry_path.into(),
            candidates_path: candidates_path.into(),
        }
    }

    pub fn run(&self, now: DateTime<Utc>) -> PipelineResult<PromotionReport> {
        let mut registry = Registry::load_or_empty(&self.registry_path)?;
        info!(
            active = registry.active().count(),
            entries = registry.entries.len(),
            "Loaded model registry"
        );

        let Some(candidates) = self.read_candidates()? else {
            warn!(path = %self.candidates_path.display(), "No candidate summary found, skipping promotion");
            return Ok(PromotionReport {
                active_count: registry.active().count(),
                ..Default::default()
            });
        };

        let mut report = PromotionReport::default();
        for candidate in &candidates {
            match evaluate(candidate, &registry) {
                Ok(()) => {
                    info!(
                        region_id = %candidate.region_id,
                        mae = candidate.metrics.mae,
                        baseline_mae = candidate.metrics.baseline_mae,
                        "Promoting candidate"
                    );
                    registry.promote(RegistryEntry::from_candidate(candidate, now));
                    report.promoted.push(candidate.region_id.clone());
                }
                Err(reason) => {
                    warn!(region_id = %candidate.region_id, reason = %reason, "Rejecting candidate");
                    report.rejected.push(Rejection {
                        region_id: candidate.region_id.clone(),
                        reason,
                    });
                }
            }
        }

        if !report.promoted.is_empty() {
            registry.save_atomic(&self.registry_path)?;
            report.registry_written = true;
        }
        self.mark_consumed(now)?;

        report.active_count = registry.active().count();
        info!(
            promoted = report.promoted.len(),
            rejected = report.rejected.len(),
            active = report.active_count,
            registry_written = report.registry_written,
            "Promotion gate finished"
        );
        Ok(report)
    }

    fn read_candidates(&self) -> PipelineResult<Option<Vec<ModelCandidate>>> {
        if !self.candidates_path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.candidates_path)?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PipelineError::RegistryCorrupt {
                path: self.candidates_path.clone(),
                reason: format!("candidate summary: {e}"),
            })
    }

    /// Move the summary aside so the same candidates are never gated twice.
    fn mark_consumed(&self, now: DateTime<Utc>) -> PipelineResult<()> {
        let stem = self
            .candidates_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "candidates".to_string());
        let consumed = self
            .candidates_path
            .with_file_name(format!("{stem}.consumed-{}.json", now.format("%Y%m%dT%H%M%S")));
        std::fs::rename(&self.candidates_path, &consumed)?;
        Ok(())
    }
}
