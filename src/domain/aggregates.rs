use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Daily groundwater snapshot per region (collection `daily_region_groundwater`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundwaterDaily {
    pub region_id: String,
    pub date: DateTime<Utc>,
    pub avg_water_level: f64,
    pub min_water_level: f64,
    pub max_water_level: f64,
    pub reading_count: u64,
    pub reporting_entity_count: u64,
}

/// Daily rainfall totals per region (collection `daily_region_rainfall`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RainfallDaily {
    pub region_id: String,
    pub date: DateTime<Utc>,
    pub total_mm: f64,
    /// Storm intensity signal
    pub max_single_reading_mm: f64,
    /// Average mm per reading
    pub intensity_mm: f64,
    pub reading_count: u64,
    pub source_diversity_count: u64,
    /// Most frequent source; ties go to the lexicographically smallest
    pub primary_source: String,
    /// Sorted, deduplicated audit trail of sources
    pub data_sources: Vec<String>,
}

/// Daily mean weather per region (collection `daily_region_weather`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDaily {
    pub region_id: String,
    pub date: DateTime<Utc>,
    pub avg_temperature_c: f64,
    pub avg_humidity_percent: f64,
    pub reading_count: u64,
}

/// Daily pumped volume per region (collection `daily_region_extraction`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDaily {
    pub region_id: String,
    pub date: DateTime<Utc>,
    pub total_volume_liters: f64,
    pub reading_count: u64,
    pub reporting_entity_count: u64,
}

/// Rows keyed by region and day.
pub trait RegionDay {
    fn region_id(&self) -> &str;
    fn date(&self) -> DateTime<Utc>;
}

macro_rules! impl_region_day {
    ($($ty:ty),* $(,)?) => {
        $(
            impl RegionDay for $ty {
                fn region_id(&self) -> &str {
                    &self.region_id
                }

                fn date(&self) -> DateTime<Utc> {
                    self.date
                }
            }
        )*
    };
}

impl_region_day!(GroundwaterDaily, RainfallDaily, WeatherDaily, ExtractionDaily);
