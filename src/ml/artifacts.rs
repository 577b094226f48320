//! Model artifact persistence
//!
//! Artifacts are bincode files under one directory. A registry entry refers
//! to an artifact by file name only, so the directory can move as a whole.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::models::{LinearRegressionModel, Regressor};
use super::{FeatureVector, ModelMetadata, Prediction};

/// Any persisted model backend.
#[derive(Debug, Serialize, Deserialize)]
pub enum ModelArtifact {
    Linear(LinearRegressionModel),
    #[cfg(feature = "ml")]
    RandomForest(super::smartcore::SmartcoreRandomForest),
}

impl ModelArtifact {
    fn inner(&self) -> &dyn Regressor {
        match self {
            ModelArtifact::Linear(model) => model,
            #[cfg(feature = "ml")]
            ModelArtifact::RandomForest(model) => model,
        }
    }
}

impl Regressor for ModelArtifact {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        self.inner().predict(features)
    }

    fn metadata(&self) -> &ModelMetadata {
        self.inner().metadata()
    }
}

/// `{region_id}_{YYYYmmdd_HHMMSS}_{suffix}.bin`
pub fn artifact_file_name(region_id: &str, trained_at: DateTime<Utc>, suffix: &str) -> String {
    format!("{}_{}_{}.bin", region_id, trained_at.format("%Y%m%d_%H%M%S"), suffix)
}

/// Split an artifact file name into region id and training timestamp.
pub fn parse_artifact_file_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = name.strip_suffix(".bin")?;
    // region ids may contain underscores, so read the fixed-width tail
    let mut parts = stem.rsplitn(4, '_');
    let _suffix = parts.next()?;
    let time = parts.next()?;
    let date = parts.next()?;
    let region = parts.next()?;
    if region.is_empty() {
        return None;
    }
    let stamp = chrono::NaiveDateTime::parse_from_str(&format!("{date}_{time}"), "%Y%m%d_%H%M%S").ok()?;
    Some((region.to_string(), stamp.and_utc()))
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, reference: &str) -> PathBuf {
        self.dir.join(reference)
    }

    /// Write an artifact and return its reference.
    pub fn save(&self, artifact: &ModelArtifact, file_name: &str) -> Result<String> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create artifact dir {}", self.dir.display()))?;
        let bytes = bincode::serialize(artifact).context("Failed to serialize model artifact")?;

        let path = self.path_of(file_name);
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(file_name.to_string())
    }

    pub fn load(&self, reference: &str) -> Result<ModelArtifact> {
        let path = self.path_of(reference);
        let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let mut artifact: ModelArtifact =
            bincode::deserialize(&bytes).with_context(|| format!("Failed to decode {}", path.display()))?;
        restore(&mut artifact)?;
        Ok(artifact)
    }
}

#[cfg(feature = "ml")]
fn restore(artifact: &mut ModelArtifact) -> Result<()> {
    match artifact {
        ModelArtifact::RandomForest(model) => model.restore_from_serialization(),
        ModelArtifact::Linear(_) => Ok(()),
    }
}

#[cfg(not(feature = "ml"))]
fn restore(_artifact: &mut ModelArtifact) -> Result<()> {
    Ok(())
}
