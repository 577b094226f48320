//! Pure record and series transforms: cleaning, daily aggregation and
//! feature engineering. Nothing in here touches the datastore.

pub mod aggregation;
pub mod cleaning;
pub mod features;

pub use aggregation::{
    aggregate_groundwater_batch, aggregate_rainfall_batch, DailyAggregator,
    ExtractionStreamAggregator, GroundwaterStreamAggregator, RainfallStreamAggregator,
    WeatherStreamAggregator,
};
pub use cleaning::{CleaningStats, ValidationError};
pub use features::{FeatureEngineer, FeatureInputs};

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
