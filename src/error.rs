//! Pipeline error taxonomy
//!
//! Validation errors are recovered per record and never surface here except
//! through counters. Everything else aborts the affected unit: a region, a
//! stage, or the whole run.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;
use crate::transform::cleaning::ValidationError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Registry not found at {}", .0.display())]
    RegistryMissing(PathBuf),

    #[error("Registry at {} is corrupt: {reason}", path.display())]
    RegistryCorrupt { path: PathBuf, reason: String },

    #[error("Insufficient history for region {region_id}: {available} rows, {required} required")]
    InsufficientHistory {
        region_id: String,
        available: usize,
        required: usize,
    },

    #[error("Datastore error: {0}")]
    Store(#[from] StoreError),

    #[error("Artifact error for {reference}: {reason}")]
    Artifact { reference: String, reason: String },

    #[error("Inference failed for region {region_id}: {reason}")]
    Inference { region_id: String, reason: String },

    #[error("Training failed for region {region_id}: {reason}")]
    Training { region_id: String, reason: String },

    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Errors that only invalidate a single region and let the run continue.
    pub fn is_region_scoped(&self) -> bool {
        matches!(
            self,
            PipelineError::InsufficientHistory { .. } | PipelineError::Training { .. }
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
