//! ML Model Training Pipeline
//!
//! One model per region, fit on the oldest rows and scored on the newest ones
//! against a persistence baseline. A region's failure never stops the others.

use super::artifacts::{artifact_file_name, ArtifactStore, ModelArtifact};
use super::models::{LinearRegressionModel, Regressor};
use super::{FeatureSet, FeatureVector, ModelMetadata, ModelType, ValidationMetrics};
use crate::config::TrainingConfig;
use crate::domain::FeatureRow;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Decimal places of persisted metrics.
pub const METRIC_PRECISION: u32 = 4;

/// Training Dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingDataset {
    pub features: Vec<FeatureVector>,
    pub targets: Vec<f64>,
}

impl TrainingDataset {
    pub fn new(features: Vec<FeatureVector>, targets: Vec<f64>) -> Result<Self> {
        if features.len() != targets.len() {
            anyhow::bail!(
                "Feature and target count mismatch: {} features, {} targets",
                features.len(),
                targets.len()
            );
        }
        Ok(Self { features, targets })
    }

    /// Project date-ordered feature rows onto `set`.
    pub fn from_rows(rows: &[FeatureRow], set: FeatureSet) -> Self {
        Self {
            features: rows.iter().map(|row| set.vector(row)).collect(),
            targets: rows.iter().map(|row| row.target_water_level).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Matrix form for the fitting backends.
    pub fn matrix(&self) -> Vec<Vec<f64>> {
        self.features.iter().map(|f| f.features.clone()).collect()
    }

    /// Split dataset into training and validation sets, preserving order
    pub fn split(&self, train_ratio: f64) -> Result<(TrainingDataset, TrainingDataset)> {
        if train_ratio <= 0.0 || train_ratio >= 1.0 {
            anyhow::bail!("Train ratio must be between 0 and 1");
        }

        let split_idx = (self.len() as f64 * train_ratio).floor() as usize;

        let train = TrainingDataset {
            features: self.features[..split_idx].to_vec(),
            targets: self.targets[..split_idx].to_vec(),
        };

        let val = TrainingDataset {
            features: self.features[split_idx..].to_vec(),
            targets: self.targets[split_idx..].to_vec(),
        };

        Ok((train, val))
    }
}

/// Scores carried by a candidate and by its registry entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CandidateMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
    /// MAE of predicting each test day with the previous day's level
    pub baseline_mae: f64,
    pub improvement_pct: f64,
}

impl CandidateMetrics {
    pub fn new(model: ValidationMetrics, baseline_mae: f64) -> Self {
        let model = model.rounded(METRIC_PRECISION);
        let baseline_mae = crate::transform::round_to(baseline_mae, METRIC_PRECISION);
        let improvement_pct = if baseline_mae > 0.0 {
            crate::transform::round_to((baseline_mae - model.mae) / baseline_mae * 100.0, 2)
        } else {
            0.0
        };
        Self {
            mae: model.mae,
            rmse: model.rmse,
            r2: model.r2,
            baseline_mae,
            improvement_pct,
        }
    }
}

/// Output of one training run for one region, consumed once by promotion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCandidate {
    pub region_id: String,
    pub model_type: ModelType,
    pub feature_set: FeatureSet,
    pub features: Vec<String>,
    pub artifact_reference: String,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub test_rows: usize,
    pub metrics: CandidateMetrics,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub coefficients: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercept: Option<f64>,
}

/// Result of training one region. Skips and failures are region scoped.
#[derive(Debug)]
pub enum TrainingOutcome {
    Candidate(ModelCandidate),
    /// Always `PipelineError::InsufficientHistory`
    Skipped(PipelineError),
    /// Always `PipelineError::Training`
    Failed(PipelineError),
}


/// Model Trainer
pub struct ModelTrainer {
    config: TrainingConfig,
    artifacts: ArtifactStore,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig, artifacts: ArtifactStore) -> Self {
        Self { config, artifacts }
    }

    /// Calculate validation metrics
    pub fn calculate_metrics(&self, predictions: &[f64], targets: &[f64]) -> Result<ValidationMetrics> {
        if predictions.len() != targets.len() {
            anyhow::bail!("Prediction and target count mismatch");
        }

        if predictions.is_empty() {
            anyhow::bail!("No predictions to evaluate");
        }

        let n = predictions.len() as f64;

        // Mean Absolute Error
        let mae: f64 = predictions
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| (p - t).abs())
            .sum::<f64>()
            / n;

        // Root Mean Square Error
        let mse: f64 = predictions
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / n;
        let rmse = mse.sqrt();

        // R-squared
        let mean_target: f64 = targets.iter().sum::<f64>() / n;
        let ss_tot: f64 = targets.iter().map(|t| (t - mean_target).powi(2)).sum();
        let ss_res: f64 = predictions
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| (t - p).powi(2))
            .sum();

        let r2 = if ss_tot.abs() < 1e-10 {
            0.0
        } else {
            1.0 - (ss_res / ss_tot)
        };

        Ok(ValidationMetrics::new(mae, rmse, r2))
    }

    /// Persistence MAE over the test targets; the first test row has no
    /// predecessor and is skipped.
    pub fn persistence_baseline(&self, targets: &[f64]) -> Result<f64> {
        if targets.len() < 2 {
            anyhow::bail!("Persistence baseline needs at least 2 test rows");
        }
        let previous = &targets[..targets.len() - 1];
        Ok(self.calculate_metrics(previous, &targets[1..])?.mae)
    }

    /// Train every region present in `rows`.
    pub fn train_all(&self, rows: &[FeatureRow], trained_at: DateTime<Utc>) -> Vec<TrainingOutcome> {
        let by_region = rows.iter().into_group_map_by(|row| row.region_id.clone());
        let mut outcomes = Vec::with_capacity(by_region.len());

        for (region_id, region_rows) in by_region.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            let region_rows: Vec<FeatureRow> = region_rows.into_iter().cloned().collect();
            let outcome = self.train_region(&region_id, region_rows, trained_at);
            match &outcome {
                TrainingOutcome::Candidate(c) => info!(
                    region_id = %region_id,
                    mae = c.metrics.mae,
                    baseline_mae = c.metrics.baseline_mae,
                    artifact = %c.artifact_reference,
                    "Region model trained"
                ),
                TrainingOutcome::Skipped(e) => warn!(
                    region_id = %region_id,
                    error = %e,
                    "Region skipped"
                ),
                TrainingOutcome::Failed(e) => warn!(
                    region_id = %region_id,
                    error = %e,
                    "Region training failed"
                ),
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn train_region(
        &self,
        region_id: &str,
        mut rows: Vec<FeatureRow>,
        trained_at: DateTime<Utc>,
    ) -> TrainingOutcome {
        rows.sort_by_key(|row| row.date);
        if rows.len() < self.config.min_history_days {
            return TrainingOutcome::Skipped(PipelineError::InsufficientHistory {
                region_id: region_id.to_string(),
                available: rows.len(),
                required: self.config.min_history_days,
            });
        }

        match self.fit_and_evaluate(region_id, &rows, trained_at) {
            Ok(candidate) => TrainingOutcome::Candidate(candidate),
            Err(e) => TrainingOutcome::Failed(PipelineError::Training {
                region_id: region_id.to_string(),
                reason: format!("{:#}", e),
            }),
        }
    }

    fn fit_and_evaluate(
        &self,
        region_id: &str,
        rows: &[FeatureRow],
        trained_at: DateTime<Utc>,
    ) -> Result<ModelCandidate> {
        let model_type = self.config.model_type;
        let feature_set = model_type.feature_set();
        let dataset = TrainingDataset::from_rows(rows, feature_set);
        let (train, test) = dataset.split(self.config.train_split_ratio)?;
        if train.is_empty() || test.len() < 2 {
            anyhow::bail!(
                "Degenerate split: {} training rows, {} test rows",
                train.len(),
                test.len()
            );
        }

        let metadata = ModelMetadata {
            model_id: format!("{}_{}", model_type, uuid::Uuid::new_v4()),
            region_id: region_id.to_string(),
            model_type,
            feature_set,
            trained_at,
            training_samples: train.len(),
            feature_names: feature_set.names(),
        };
        let artifact = self.fit(&train, metadata)?;

        let predictions = test
            .features
            .iter()
            .map(|f| artifact.predict(f).map(|p| p.value))
            .collect::<Result<Vec<_>>>()?;
        let model_metrics = self.calculate_metrics(&predictions, &test.targets)?;
        let baseline = self.persistence_baseline(&test.targets)?;

        let (coefficients, intercept) = match &artifact {
            ModelArtifact::Linear(model) => (
                feature_set
                    .names()
                    .into_iter()
                    .zip(&model.coefficients)
                    .map(|(name, c)| (name, crate::transform::round_to(*c, METRIC_PRECISION)))
                    .collect(),
                Some(crate::transform::round_to(model.intercept, METRIC_PRECISION)),
            ),
            #[allow(unreachable_patterns)]
            _ => (BTreeMap::new(), None),
        };

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let file_name = artifact_file_name(region_id, trained_at, &suffix[..8]);
        let artifact_reference = self
            .artifacts
            .save(&artifact, &file_name)
            .context("Failed to persist model artifact")?;

        Ok(ModelCandidate {
            region_id: region_id.to_string(),
            model_type,
            feature_set,
            features: feature_set.names(),
            artifact_reference,
            trained_at,
            training_rows: train.len(),
            test_rows: test.len(),
            metrics: CandidateMetrics::new(model_metrics, baseline),
            coefficients,
            intercept,
        })
    }

    fn fit(&self, train: &TrainingDataset, metadata: ModelMetadata) -> Result<ModelArtifact> {
        let x = train.matrix();
        match metadata.model_type {
            ModelType::LinearRegression => Ok(ModelArtifact::Linear(LinearRegressionModel::fit(
                &x,
                &train.targets,
                self.config.ridge_lambda,
                metadata,
            )?)),
            #[cfg(feature = "ml")]
            ModelType::RandomForest => {
                let params = super::smartcore::SmartcoreRandomForest::custom_parameters(
                    self.config.n_trees,
                    self.config.max_depth,
                    5,
                    self.config.seed,
                );
                Ok(ModelArtifact::RandomForest(super::smartcore::SmartcoreRandomForest::train(
                    &x,
                    &train.targets,
                    params,
                    metadata,
                )?))
            }
            #[cfg(not(feature = "ml"))]
            ModelType::RandomForest => {
                anyhow::bail!("random_forest models require the `ml` feature")
            }
        }
    }
}

/// Write the candidate summary with a temp file plus rename.
pub fn write_candidates(path: &Path, candidates: &[ModelCandidate]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_vec_pretty(candidates)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
