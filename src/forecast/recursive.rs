//! Recursive multi-step forecasting
//!
//! Each predicted level is appended to an in-memory buffer and becomes history
//! for the next step, so lag, window and trend features are recomputed from a
//! mix of observed and predicted rows.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::domain::{net_flux_proxy, ExtractionSchedule, FeatureRow, ForecastRow, FEATURE_SCHEMA_VERSION};
use crate::error::{PipelineError, PipelineResult};
use crate::ml::models::Regressor;
use crate::ml::FeatureSet;
use crate::transform::features::{log_extraction, seasonality, MIN_LOOKBACK_ROWS, TREND_LAG_ROWS};
use crate::transform::round_to;

/// Decimal places of a persisted prediction.
pub const PREDICTION_PRECISION: u32 = 4;

#[derive(Debug, Clone, Copy)]
struct BufferRow {
    level: f64,
    net_flux: f64,
}

/// Everything the loop needs about one region.
pub struct RegionForecast<'a> {
    pub region_id: &'a str,
    pub model: &'a dyn Regressor,
    pub feature_set: FeatureSet,
    pub model_version: &'a str,
    /// Oldest first
    pub history: &'a [FeatureRow],
}

#[derive(Debug, Clone, Copy)]
pub struct RecursiveForecaster {
    horizon_days: u32,
}

impl RecursiveForecaster {
    pub fn new(horizon_days: u32) -> Self {
        Self { horizon_days }
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Forecast `horizon_days` steps past the last history row.
    ///
    /// Future rainfall is zero. Extraction is zero unless a schedule is
    /// given. Returns `InsufficientHistory` when the buffer cannot
    /// support the trend feature, and `Inference` on any model failure.
    pub fn forecast(
        &self,
        region: &RegionForecast<'_>,
        schedule: Option<&ExtractionSchedule>,
        created_at: DateTime<Utc>,
    ) -> PipelineResult<Vec<ForecastRow>> {
        let history = region.history;
        let Some(last) = history.last() else {
            return Err(PipelineError::InsufficientHistory {
                region_id: region.region_id.to_string(),
                available: 0,
                required: MIN_LOOKBACK_ROWS,
            });
        };
        if history.len() < MIN_LOOKBACK_ROWS {
            return Err(PipelineError::InsufficientHistory {
                region_id: region.region_id.to_string(),
                available: history.len(),
                required: MIN_LOOKBACK_ROWS,
            });
        }

        let permeability = last.feat_soil_permeability;
        let window = (last.flux_window_days as usize).max(1);
        let mut buffer: Vec<BufferRow> = history
            .iter()
            .map(|row| BufferRow {
                level: row.target_water_level,
                net_flux: row.net_flux(),
            })
            .collect();

        let mut rows = Vec::with_capacity(self.horizon_days as usize);
        for step in 1..=self.horizon_days {
            let date = last.date + Duration::days(i64::from(step));
            let volume = schedule.map(|s| s.volume_for_step(step));
            let effective_rainfall = 0.0;
            let log_ext = log_extraction(volume.unwrap_or(0.0));
            let (sin_day, cos_day) = seasonality(date);

            let n = buffer.len();
            let recent = &buffer[n.saturating_sub(window)..];
            let step_row = FeatureRow {
                region_id: region.region_id.to_string(),
                date,
                target_water_level: 0.0,
                effective_rainfall,
                log_extraction: log_ext,
                feat_net_flux_1d_lag: buffer[n - 1].net_flux,
                feat_net_flux_window_sum: recent.iter().map(|r| r.net_flux).sum(),
                feat_water_trend_7d: buffer[n - 1].level - buffer[n - 1 - TREND_LAG_ROWS].level,
                feat_soil_permeability: permeability,
                feat_sin_day: sin_day,
                feat_cos_day: cos_day,
                flux_window_days: last.flux_window_days,
                schema_version: FEATURE_SCHEMA_VERSION.to_string(),
            };

            let prediction = region
                .model
                .predict(&region.feature_set.vector(&step_row))
                .map_err(|e| PipelineError::Inference {
                    region_id: region.region_id.to_string(),
                    reason: format!("step {step}: {e:#}"),
                })?;
            debug!(region_id = region.region_id, step, value = prediction.value, "Forecast step");

            buffer.push(BufferRow {
                level: prediction.value,
                net_flux: net_flux_proxy(effective_rainfall, log_ext),
            });
            rows.push(ForecastRow {
                region_id: region.region_id.to_string(),
                forecast_date: date,
                predicted_level: round_to(prediction.value, PREDICTION_PRECISION),
                model_version: region.model_version.to_string(),
                horizon_step: step,
                scenario_extraction: volume,
                created_at,
            });
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::models::LinearRegressionModel;
    use crate::ml::{FeatureVector, ModelMetadata, ModelType, Prediction};
    use chrono::TimeZone;

    fn day(d: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::days(d)
    }

    fn history(len: usize, flux_window_days: u32) -> Vec<FeatureRow> {
        (0..len)
            .map(|i| FeatureRow {
                region_id: "A".into(),
                date: day(i as i64),
                target_water_level: 10.0 + i as f64,
                effective_rainfall: 1.0,
                log_extraction: 0.0,
                feat_net_flux_1d_lag: 1.0,
                feat_net_flux_window_sum: 7.0,
                feat_water_trend_7d: 7.0,
                feat_soil_permeability: 0.5,
                feat_sin_day: 0.0,
                feat_cos_day: 1.0,
                flux_window_days,
                schema_version: FEATURE_SCHEMA_VERSION.into(),
            })
            .collect()
    }

    fn metadata(set: FeatureSet) -> ModelMetadata {
        ModelMetadata {
            model_id: "m".into(),
            region_id: "A".into(),
            model_type: ModelType::LinearRegression,
            feature_set: set,
            trained_at: Utc::now(),
            training_samples: 100,
            feature_names: set.names(),
        }
    }

    /// Echoes one input column so tests can read back the assembled features.
    struct Echo {
        metadata: ModelMetadata,
        column: usize,
    }

    impl Regressor for Echo {
        fn predict(&self, features: &FeatureVector) -> anyhow::Result<Prediction> {
            Ok(Prediction::new(features.features[self.column]))
        }

        fn metadata(&self) -> &ModelMetadata {
            &self.metadata
        }
    }

    struct Failing(ModelMetadata);

    impl Regressor for Failing {
        fn predict(&self, _features: &FeatureVector) -> anyhow::Result<Prediction> {
            anyhow::bail!("boom")
        }

        fn metadata(&self) -> &ModelMetadata {
            &self.0
        }
    }

    fn region<'a>(model: &'a dyn Regressor, set: FeatureSet, history: &'a [FeatureRow]) -> RegionForecast<'a> {
        RegionForecast {
            region_id: "A",
            model,
            feature_set: set,
            model_version: "v1",
            history,
        }
    }

    #[test]
    fn test_predictions_feed_back_into_trend() {
        // level(t) = level(t-1) + 1 through the intercept and trend coefficient
        let model = LinearRegressionModel::new(
            vec![0.0, 0.0, 1.0, 0.0, 0.0],
            20.0 - 7.0,
            metadata(FeatureSet::LinearV1),
        );
        let history = history(10, 7);
        let rows = RecursiveForecaster::new(3)
            .forecast(&region(&model, FeatureSet::LinearV1, &history), None, Utc::now())
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().map(|r| r.horizon_step).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(rows[0].forecast_date, day(10));
        assert_eq!(rows[2].forecast_date, day(12));
        // step 1: trend = 19 - 12 = 7, prediction 20
        assert_eq!(rows[0].predicted_level, 20.0);
        // step 2: trend = 20 - 13 = 7
        assert_eq!(rows[1].predicted_level, 20.0);
        // step 3: trend = 20 - 14 = 6
        assert_eq!(rows[2].predicted_level, 19.0);
        assert!(rows.iter().all(|r| r.scenario_extraction.is_none()));
    }

    #[test]
    fn test_window_sum_mixes_history_and_predicted_flux() {
        let set = FeatureSet::LinearV1;
        // column 1 = feat_net_flux_window_sum
        let model = Echo { metadata: metadata(set), column: 1 };
        let history = history(10, 7);
        let rows = RecursiveForecaster::new(3)
            .forecast(&region(&model, set, &history), None, Utc::now())
            .unwrap();
        // history flux is 1.0 per day, predicted steps add zero flux
        assert_eq!(rows[0].predicted_level, 7.0);
        assert_eq!(rows[1].predicted_level, 6.0);
        assert_eq!(rows[2].predicted_level, 5.0);
    }

    #[test]
    fn test_window_capped_by_buffer_length() {
        let set = FeatureSet::LinearV1;
        let model = Echo { metadata: metadata(set), column: 1 };
        let history = history(8, 30);
        let rows = RecursiveForecaster::new(1)
            .forecast(&region(&model, set, &history), None, Utc::now())
            .unwrap();
        assert_eq!(rows[0].predicted_level, 8.0);
    }

    #[test]
    fn test_scenario_extraction_enters_as_log_volume() {
        let set = FeatureSet::RandomForestV1;
        // column 1 = log_extraction
        let model = Echo { metadata: metadata(set), column: 1 };
        let history = history(10, 7);
        let schedule = ExtractionSchedule::PerStep(vec![(1.0f64).exp() - 1.0]);
        let rows = RecursiveForecaster::new(2)
            .forecast(&region(&model, set, &history), Some(&schedule), Utc::now())
            .unwrap();
        assert_eq!(rows[0].predicted_level, 1.0);
        assert_eq!(rows[1].predicted_level, 0.0);
        assert_eq!(rows[1].scenario_extraction, Some(0.0));
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let model = Echo { metadata: metadata(FeatureSet::LinearV1), column: 0 };
        let history = history(7, 7);
        let err = RecursiveForecaster::new(7)
            .forecast(&region(&model, FeatureSet::LinearV1, &history), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientHistory { available: 7, .. }));
    }

    #[test]
    fn test_model_failure_is_inference_error() {
        let model = Failing(metadata(FeatureSet::LinearV1));
        let history = history(10, 7);
        let err = RecursiveForecaster::new(7)
            .forecast(&region(&model, FeatureSet::LinearV1, &history), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Inference { .. }));
    }
}
