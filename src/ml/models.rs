//! ML Model Definitions
//!
//! Concrete regressors behind the [`Regressor`] capability.

use super::{FeatureVector, ModelMetadata, ModelType, Prediction};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Trait for ML models
pub trait Regressor: Send + Sync {
    /// Predict a value from features
    fn predict(&self, features: &FeatureVector) -> Result<Prediction>;

    /// Get model metadata
    fn metadata(&self) -> &ModelMetadata;

    /// Get model type
    fn model_type(&self) -> ModelType {
        self.metadata().model_type
    }
}

/// Ordinary least squares regression
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearRegressionModel {
    pub metadata: ModelMetadata,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearRegressionModel {
    pub fn new(coefficients: Vec<f64>, intercept: f64, metadata: ModelMetadata) -> Self {
        Self {
            metadata,
            coefficients,
            intercept,
        }
    }

    /// Fit by solving the normal equations.
    ///
    /// `ridge` is added to the diagonal of every coefficient (not the
    /// intercept) so collinear features still give a unique solution.
    pub fn fit(x: &[Vec<f64>], y: &[f64], ridge: f64, metadata: ModelMetadata) -> Result<Self> {
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

        let n_features = x[0].len();
        let dim = n_features + 1;
        let mut xtx = vec![vec![0.0; dim]; dim];
        let mut xty = vec![0.0; dim];

        for (row, target) in x.iter().zip(y) {
            if row.len() != n_features {
                anyhow::bail!("All feature vectors must have the same length");
            }
            // Augmented row [1, x_1, ..., x_p]
            let augmented = |i: usize| if i == 0 { 1.0 } else { row[i - 1] };
            for i in 0..dim {
                let xi = augmented(i);
                xty[i] += xi * target;
                for j in i..dim {
                    xtx[i][j] += xi * augmented(j);
                }
            }
        }
        for i in 0..dim {
            for j in 0..i {
                xtx[i][j] = xtx[j][i];
            }
            if i > 0 {
                xtx[i][i] += ridge;
            }
        }

        let beta = solve(xtx, xty)?;
        Ok(Self::new(beta[1..].to_vec(), beta[0], metadata))
    }

    fn evaluate(&self, features: &[f64]) -> f64 {
        features
            .iter()
            .zip(self.coefficients.iter())
            .map(|(f, c)| f * c)
            .sum::<f64>()
            + self.intercept
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            anyhow::bail!("Normal equations are singular (column {})", col);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    if x.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("Regression produced non-finite coefficients");
    }
    Ok(x)
}

impl Regressor for LinearRegressionModel {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        if features.len() != self.coefficients.len() {
            anyhow::bail!(
                "Feature count mismatch: expected {}, got {}",
                self.coefficients.len(),
                features.len()
            );
        }

        let value = self.evaluate(&features.features);
        if !value.is_finite() {
            anyhow::bail!("Invalid prediction: non-finite water level");
        }
        Ok(Prediction::new(value))
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
