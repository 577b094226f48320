//! Machine Learning Module
//!
//! Per-region regression models that predict the next daily water level from
//! one feature row. The forecaster only sees the [`models::Regressor`]
//! capability; which backend sits behind it is recorded in the registry.
//!
//! # Architecture
//! - Versioned feature sets: each model type reads a fixed, ordered column list
//! - Offline training with a time-ordered split and a persistence baseline
//! - Artifacts serialized with bincode and addressed by file name

use anyhow::Result;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::domain::{FeatureColumn, FeatureRow};

pub mod artifacts;
pub mod models;
pub mod training;

#[cfg(feature = "ml")]
pub mod smartcore;

pub use artifacts::{ArtifactStore, ModelArtifact};
pub use models::{LinearRegressionModel, Regressor};
pub use training::{ModelCandidate, ModelTrainer, TrainingDataset, TrainingOutcome};

/// ML Model Type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelType {
    #[default]
    LinearRegression,
    RandomForest,
}

impl ModelType {
    /// Feature set this model type is trained and served with.
    pub fn feature_set(&self) -> FeatureSet {
        match self {
            ModelType::LinearRegression => FeatureSet::LinearV1,
            ModelType::RandomForest => FeatureSet::RandomForestV1,
        }
    }
}

/// Canonical ordered feature list, versioned per model family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
pub enum FeatureSet {
    #[serde(rename = "linear-v1")]
    #[strum(serialize = "linear-v1")]
    LinearV1,
    #[serde(rename = "rf-v1")]
    #[strum(serialize = "rf-v1")]
    RandomForestV1,
}

const LINEAR_V1: [FeatureColumn; 5] = [
    FeatureColumn::NetFlux1dLag,
    FeatureColumn::NetFluxWindowSum,
    FeatureColumn::WaterTrend7d,
    FeatureColumn::SinDay,
    FeatureColumn::CosDay,
];

const RANDOM_FOREST_V1: [FeatureColumn; 8] = [
    FeatureColumn::EffectiveRainfall,
    FeatureColumn::LogExtraction,
    FeatureColumn::NetFlux1dLag,
    FeatureColumn::NetFluxWindowSum,
    FeatureColumn::WaterTrend7d,
    FeatureColumn::SoilPermeability,
    FeatureColumn::SinDay,
    FeatureColumn::CosDay,
];

impl FeatureSet {
    pub fn columns(&self) -> &'static [FeatureColumn] {
        match self {
            FeatureSet::LinearV1 => &LINEAR_V1,
            FeatureSet::RandomForestV1 => &RANDOM_FOREST_V1,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.to_string()).collect()
    }

    /// Project a feature row onto this set's columns, in order.
    pub fn vector(&self, row: &FeatureRow) -> FeatureVector {
        FeatureVector {
            features: self.columns().iter().map(|c| row.get(*c)).collect(),
            feature_names: self.names(),
        }
    }
}

/// ML Model Metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    pub model_id: String,
    pub region_id: String,
    pub model_type: ModelType,
    pub feature_set: FeatureSet,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub training_samples: usize,
    pub feature_names: Vec<String>,
}

/// Validation Metrics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ValidationMetrics {
    pub mae: f64,  // Mean Absolute Error
    pub rmse: f64, // Root Mean Square Error
    pub r2: f64,   // R-squared
}

impl ValidationMetrics {
    pub fn new(mae: f64, rmse: f64, r2: f64) -> Self {
        Self { mae, rmse, r2 }
    }

    /// Every metric rounded to `places` decimals.
    pub fn rounded(&self, places: u32) -> Self {
        let round = |v: f64| crate::transform::round_to(v, places);
        Self::new(round(self.mae), round(self.rmse), round(self.r2))
    }
}

/// Feature Vector for ML models
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub features: Vec<f64>,
    pub feature_names: Vec<String>,
}

impl FeatureVector {
    pub fn new(features: Vec<f64>, feature_names: Vec<String>) -> Result<Self> {
        if features.len() != feature_names.len() {
            anyhow::bail!(
                "Feature count mismatch: {} features, {} names",
                features.len(),
                feature_names.len()
            );
        }
        Ok(Self {
            features,
            feature_names,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// ML Prediction Result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub value: f64,
}

impl Prediction {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}
