//! SmartCore ML Model Wrapper
//!
//! This module provides a wrapper for SmartCore's RandomForestRegressor,
//! trained on the `rf-v1` feature set.

use super::{FeatureVector, ModelMetadata, Prediction};
use anyhow::Result;
use serde::{Deserialize, Serialize};

use smartcore::ensemble::random_forest_regressor::{RandomForestRegressor, RandomForestRegressorParameters};
use smartcore::linalg::basic::matrix::DenseMatrix;

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// SmartCore RandomForest Model Wrapper
///
/// The fitted forest is kept as bincode bytes for persistence and decoded
/// into `model` after loading.
#[derive(Debug, Serialize, Deserialize)]
pub struct SmartcoreRandomForest {
    pub metadata: ModelMetadata,
    #[serde(skip)]
    model: Option<Forest>,
    /// Serialized model bytes (for persistence)
    model_bytes: Vec<u8>,
    /// Training parameters for reproducibility
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl SmartcoreRandomForest {
    /// Parameters with custom settings
    pub fn custom_parameters(
        n_trees: usize,
        max_depth: Option<usize>,
        min_samples_split: usize,
        seed: u64,
    ) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters {
            max_depth: max_depth.map(|d| d as u16),
            min_samples_leaf: 2,
            min_samples_split,
            n_trees,
            m: None,
            keep_samples: false,
            seed,
        }
    }

    /// Train a new RandomForest model
    pub fn train(
        x: &[Vec<f64>],
        y: &[f64],
        params: RandomForestRegressorParameters,
        metadata: ModelMetadata,
    ) -> Result<Self> {
        if x.is_empty() || y.is_empty() {
            anyhow::bail!("Cannot train on empty dataset");
        }

        if x.len() != y.len() {
            anyhow::bail!(
                "Feature and target count mismatch: {} features, {} targets",
                x.len(),
                y.len()
            );
        }

        // Store params values before moving
        let n_trees = params.n_trees;
        let max_depth = params.max_depth.map(|d| d as usize);
        let min_samples_split = params.min_samples_split;
        let min_samples_leaf = params.min_samples_leaf;

        // Convert to DenseMatrix
        let n_samples = x.len();
        let n_features = x[0].len();

        let mut flat_data = Vec::with_capacity(n_samples * n_features);
        for row in x {
            if row.len() != n_features {
                anyhow::bail!("All feature vectors must have the same length");
            }
            flat_data.extend_from_slice(row);
        }

        let x_matrix = DenseMatrix::new(n_samples, n_features, flat_data, false);
        let y_vec = y.to_vec();

        let model = RandomForestRegressor::fit(&x_matrix, &y_vec, params)
            .map_err(|e| anyhow::anyhow!("RandomForest training failed: {:?}", e))?;

        let model_bytes = bincode::serialize(&model)
            .map_err(|e| anyhow::anyhow!("Failed to serialize model: {}", e))?;

        Ok(Self {
            metadata,
            model: Some(model),
            model_bytes,
            n_trees,
            max_depth,
            min_samples_split,
            min_samples_leaf,
        })
    }

    /// Restore model from serialized bytes
    pub fn restore_from_serialization(&mut self) -> Result<()> {
        let model: Forest = bincode::deserialize(&self.model_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to deserialize model: {}", e))?;
        self.model = Some(model);
        Ok(())
    }
}

impl super::models::Regressor for SmartcoreRandomForest {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Model not loaded"))?;

        if features.len() != self.metadata.feature_names.len() {
            anyhow::bail!(
                "Feature count mismatch: expected {}, got {}",
                self.metadata.feature_names.len(),
                features.len()
            );
        }

        // Convert feature vector to DenseMatrix (1 row, n features)
        let n_features = features.len();
        let x = DenseMatrix::new(1, n_features, features.features.clone(), false);

        let predictions = model
            .predict(&x)
            .map_err(|e| anyhow::anyhow!("Prediction failed: {:?}", e))?;

        let value = *predictions
            .first()
            .ok_or_else(|| anyhow::anyhow!("Model returned empty predictions"))?;

        if !value.is_finite() {
            anyhow::bail!("Invalid prediction: non-finite water level");
        }

        Ok(Prediction::new(value))
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
