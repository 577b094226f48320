//! Feature engineering
//!
//! Turns daily aggregates into one [`FeatureRow`] per region and day. Each
//! region is processed on its own groundwater date backbone, so lags never
//! cross region boundaries. All lag, rolling and trend features at row `t`
//! read rows `t-1` and earlier only.

use chrono::{DateTime, Datelike, Utc};
use itertools::Itertools;
use std::collections::HashMap;
use std::f64::consts::PI;

use super::round_to;
use crate::config::FeatureConfig;
use crate::domain::{
    net_flux_proxy, ExtractionDaily, FeatureRow, GroundwaterDaily, RainfallDaily, RegionMetadata,
    WeatherDaily, FEATURE_SCHEMA_VERSION,
};

/// Rows between the two levels of the trend feature.
pub const TREND_LAG_ROWS: usize = 7;

/// Trailing rows a feature row needs: the trend reads `t-1` and `t-8`.
pub const MIN_LOOKBACK_ROWS: usize = TREND_LAG_ROWS + 1;

/// Evapotranspiration loss (mm/day) from temperature and relative humidity.
pub fn evapotranspiration(temperature_c: f64, humidity_percent: f64) -> f64 {
    (0.05 * temperature_c * (100.0 - humidity_percent) / 100.0).max(0.0)
}

pub fn effective_rainfall(rainfall_mm: f64, evap_loss_mm: f64) -> f64 {
    (rainfall_mm - evap_loss_mm).max(0.0)
}

/// `ln(1 + volume)`; negative volumes are treated as zero.
pub fn log_extraction(volume_liters: f64) -> f64 {
    volume_liters.max(0.0).ln_1p()
}

/// Sine and cosine of the day-of-year phase.
pub fn seasonality(date: DateTime<Utc>) -> (f64, f64) {
    let phase = 2.0 * PI * date.ordinal() as f64 / 365.0;
    (phase.sin(), phase.cos())
}

/// Daily series feeding one feature generation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureInputs<'a> {
    pub groundwater: &'a [GroundwaterDaily],
    pub rainfall: &'a [RainfallDaily],
    pub weather: &'a [WeatherDaily],
    pub extraction: &'a [ExtractionDaily],
}

type DayIndex<'a, T> = HashMap<(&'a str, DateTime<Utc>), &'a T>;

fn index_by_day<'a, T>(rows: &'a [T], key: impl Fn(&'a T) -> (&'a str, DateTime<Utc>)) -> DayIndex<'a, T> {
    rows.iter().map(|row| (key(row), row)).collect()
}

/// Builds feature rows from daily aggregates.
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Generate rows for every region present in `inputs.groundwater`.
    ///
    /// Output is sorted by region then date. Rows without enough trailing
    /// history for every lag feature are dropped.
    pub fn generate(
        &self,
        inputs: &FeatureInputs<'_>,
        regions: &HashMap<String, RegionMetadata>,
    ) -> Vec<FeatureRow> {
        let rainfall = index_by_day(inputs.rainfall, |r| (r.region_id.as_str(), r.date));
        let weather = index_by_day(inputs.weather, |r| (r.region_id.as_str(), r.date));
        let extraction = index_by_day(inputs.extraction, |r| (r.region_id.as_str(), r.date));

        let by_region = inputs
            .groundwater
            .iter()
            .map(|row| (row.region_id.as_str(), row))
            .into_group_map();

        let mut output = Vec::new();
        for (region_id, mut backbone) in by_region.into_iter().sorted_by_key(|(id, _)| *id) {
            backbone.sort_by_key(|row| row.date);
            backbone.dedup_by_key(|row| row.date);

            let meta = match regions.get(region_id) {
                Some(meta) => meta.clone(),
                None => {
                    let mut meta = RegionMetadata::fallback(region_id);
                    meta.permeability_index = self.config.default_permeability;
                    meta
                }
            };

            let rows = self.generate_region(&backbone, &meta, &rainfall, &weather, &extraction);
            tracing::debug!(
                region_id,
                backbone_days = backbone.len(),
                feature_rows = rows.len(),
                "Generated region features"
            );
            output.extend(rows);
        }
        output
    }

    fn generate_region(
        &self,
        backbone: &[&GroundwaterDaily],
        meta: &RegionMetadata,
        rainfall: &DayIndex<'_, RainfallDaily>,
        weather: &DayIndex<'_, WeatherDaily>,
        extraction: &DayIndex<'_, ExtractionDaily>,
    ) -> Vec<FeatureRow> {
        let region_id = meta.region_id.as_str();
        let climate = self.fill_weather(region_id, backbone, weather);
        let window = meta.flux_window_days();
        let permeability = if meta.permeability_index.is_finite() {
            meta.permeability_index
        } else {
            self.config.default_permeability
        };

        let mut effective = Vec::with_capacity(backbone.len());
        let mut log_ext = Vec::with_capacity(backbone.len());
        let mut flux = Vec::with_capacity(backbone.len());
        for (row, (temperature, humidity)) in backbone.iter().zip(&climate) {
            let key = (region_id, row.date);
            let rain = rainfall.get(&key).map_or(0.0, |r| r.total_mm);
            let volume = extraction.get(&key).map_or(0.0, |e| e.total_volume_liters);

            let eff = effective_rainfall(rain, evapotranspiration(*temperature, *humidity));
            let ext = log_extraction(volume);
            effective.push(eff);
            log_ext.push(ext);
            flux.push(net_flux_proxy(eff, ext));
        }

        let precision = self.config.precision;
        let round = |value: f64| round_to(value, precision);

        (MIN_LOOKBACK_ROWS..backbone.len())
            .map(|t| {
                let row = backbone[t];
                let window_sum: f64 = flux[t.saturating_sub(window)..t].iter().sum();
                let trend = backbone[t - 1].avg_water_level
                    - backbone[t - 1 - TREND_LAG_ROWS].avg_water_level;
                let (sin_day, cos_day) = seasonality(row.date);

                FeatureRow {
                    region_id: region_id.to_string(),
                    date: row.date,
                    target_water_level: round(row.avg_water_level),
                    effective_rainfall: round(effective[t]),
                    log_extraction: round(log_ext[t]),
                    feat_net_flux_1d_lag: round(flux[t - 1]),
                    feat_net_flux_window_sum: round(window_sum),
                    feat_water_trend_7d: round(trend),
                    feat_soil_permeability: round(permeability),
                    feat_sin_day: round(sin_day),
                    feat_cos_day: round(cos_day),
                    flux_window_days: window as u32,
                    schema_version: FEATURE_SCHEMA_VERSION.to_string(),
                }
            })
            .filter(|row| row.target_water_level.is_finite())
            .collect()
    }

    /// Temperature and humidity per backbone day: forward fill, then back
    /// fill, then climatology defaults when the region has no weather at all.
    fn fill_weather(
        &self,
        region_id: &str,
        backbone: &[&GroundwaterDaily],
        weather: &DayIndex<'_, WeatherDaily>,
    ) -> Vec<(f64, f64)> {
        let observed: Vec<Option<(f64, f64)>> = backbone
            .iter()
            .map(|row| {
                weather
                    .get(&(region_id, row.date))
                    .map(|w| (w.avg_temperature_c, w.avg_humidity_percent))
            })
            .collect();

        let defaults = (
            self.config.default_temperature_c,
            self.config.default_humidity_percent,
        );
        let Some(first) = observed.iter().flatten().next().copied() else {
            return vec![defaults; backbone.len()];
        };

        // Leading gaps take the first observation.
        let mut last = first;
        observed
            .into_iter()
            .map(|value| {
                if let Some(value) = value {
                    last = value;
                }
                last
            })
            .collect()
    }
}
