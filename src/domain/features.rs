//! Feature store rows
//!
//! One [`FeatureRow`] per region and day. Every `feat_*` column at date `d` is
//! derived from rows strictly before `d`; `effective_rainfall` and
//! `log_extraction` are same-day forcing inputs known at forecast time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Weight of log-extraction in the net flux proxy.
pub const EXTRACTION_FLUX_WEIGHT: f64 = 0.1;

/// Schema tag written on every feature row.
pub const FEATURE_SCHEMA_VERSION: &str = "gw-features-v3";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub region_id: String,
    pub date: DateTime<Utc>,
    /// Label, never an input
    pub target_water_level: f64,
    pub effective_rainfall: f64,
    pub log_extraction: f64,
    pub feat_net_flux_1d_lag: f64,
    pub feat_net_flux_window_sum: f64,
    pub feat_water_trend_7d: f64,
    pub feat_soil_permeability: f64,
    pub feat_sin_day: f64,
    pub feat_cos_day: f64,
    /// Rolling window used for `feat_net_flux_window_sum`
    pub flux_window_days: u32,
    pub schema_version: String,
}

impl FeatureRow {
    pub fn get(&self, column: FeatureColumn) -> f64 {
        match column {
            FeatureColumn::EffectiveRainfall => self.effective_rainfall,
            FeatureColumn::LogExtraction => self.log_extraction,
            FeatureColumn::NetFlux1dLag => self.feat_net_flux_1d_lag,
            FeatureColumn::NetFluxWindowSum => self.feat_net_flux_window_sum,
            FeatureColumn::WaterTrend7d => self.feat_water_trend_7d,
            FeatureColumn::SoilPermeability => self.feat_soil_permeability,
            FeatureColumn::SinDay => self.feat_sin_day,
            FeatureColumn::CosDay => self.feat_cos_day,
        }
    }

    /// Same-day net flux proxy reconstructed from the stored forcing columns.
    pub fn net_flux(&self) -> f64 {
        net_flux_proxy(self.effective_rainfall, self.log_extraction)
    }
}

pub fn net_flux_proxy(effective_rainfall: f64, log_extraction: f64) -> f64 {
    effective_rainfall - log_extraction * EXTRACTION_FLUX_WEIGHT
}

/// Model input columns of a [`FeatureRow`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString, EnumIter,
)]
pub enum FeatureColumn {
    #[strum(serialize = "effective_rainfall")]
    #[serde(rename = "effective_rainfall")]
    EffectiveRainfall,
    #[strum(serialize = "log_extraction")]
    #[serde(rename = "log_extraction")]
    LogExtraction,
    #[strum(serialize = "feat_net_flux_1d_lag")]
    #[serde(rename = "feat_net_flux_1d_lag")]
    NetFlux1dLag,
    #[strum(serialize = "feat_net_flux_window_sum")]
    #[serde(rename = "feat_net_flux_window_sum")]
    NetFluxWindowSum,
    #[strum(serialize = "feat_water_trend_7d")]
    #[serde(rename = "feat_water_trend_7d")]
    WaterTrend7d,
    #[strum(serialize = "feat_soil_permeability")]
    #[serde(rename = "feat_soil_permeability")]
    SoilPermeability,
    #[strum(serialize = "feat_sin_day")]
    #[serde(rename = "feat_sin_day")]
    SinDay,
    #[strum(serialize = "feat_cos_day")]
    #[serde(rename = "feat_cos_day")]
    CosDay,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_column_names_match_row_fields() {
        for column in FeatureColumn::iter() {
            let parsed = FeatureColumn::from_str(column.as_ref()).unwrap();
            assert_eq!(parsed, column);
        }
        assert_eq!(FeatureColumn::WaterTrend7d.to_string(), "feat_water_trend_7d");
    }

    #[test]
    fn test_net_flux_proxy() {
        assert_eq!(net_flux_proxy(5.0, 10.0), 4.0);
        assert_eq!(net_flux_proxy(0.0, 0.0), 0.0);
    }
}
