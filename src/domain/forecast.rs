use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One forecast step for a region (collection `daily_forecasts`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub region_id: String,
    pub forecast_date: DateTime<Utc>,
    pub predicted_level: f64,
    pub model_version: String,
    /// 1-based step within the horizon
    pub horizon_step: u32,
    /// Extraction volume assumed for this step (scenario runs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_extraction: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Future pumping assumed by a what-if forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractionSchedule {
    /// Same volume (liters/day) on every step
    Uniform(f64),
    /// Volume per step; steps past the end assume no pumping
    PerStep(Vec<f64>),
}

impl ExtractionSchedule {
    /// Volume for a 1-based horizon step.
    pub fn volume_for_step(&self, step: u32) -> f64 {
        let volume = match self {
            ExtractionSchedule::Uniform(v) => *v,
            ExtractionSchedule::PerStep(values) => step
                .checked_sub(1)
                .and_then(|idx| values.get(idx as usize))
                .copied()
                .unwrap_or(0.0),
        };
        if volume.is_finite() {
            volume.max(0.0)
        } else {
            0.0
        }
    }
}
