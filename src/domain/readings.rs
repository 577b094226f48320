//! Raw source records and their cleaned form
//!
//! Raw records mirror the upstream documents 1:1: every field is optional and
//! numeric fields may arrive as numbers or strings. Use
//! [`crate::transform::cleaning`] to turn them into [`CleanedRecord`]s.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp as delivered by a source.
///
/// Documents decoded from JSON always land in `Text`; the other variants are
/// for callers that already hold a datetime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl From<&str> for RawTimestamp {
    fn from(value: &str) -> Self {
        RawTimestamp::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        RawTimestamp::Aware(value.fixed_offset())
    }
}

impl From<NaiveDateTime> for RawTimestamp {
    fn from(value: NaiveDateTime) -> Self {
        RawTimestamp::Naive(value)
    }
}

/// Numeric field that may have been serialized as a string upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

/// Well water level reading (collection `water_readings`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawWaterReading {
    pub well_id: Option<String>,
    pub region_id: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    pub water_level: Option<RawValue>,
    pub source: Option<String>,
}

/// Rain gauge or manual rainfall report (collection `rainfall`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRainfall {
    pub region_id: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    pub amount_mm: Option<RawValue>,
    pub source: Option<String>,
}

/// Weather station observation (collection `weather`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawWeather {
    pub region_id: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    pub temperature_c: Option<RawValue>,
    pub humidity_percent: Option<RawValue>,
    pub source: Option<String>,
}

/// Pumping log entry (collection `extraction`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawExtraction {
    pub region_id: Option<String>,
    pub well_id: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    pub volume_liters: Option<RawValue>,
    pub source: Option<String>,
}

/// Validated single-metric record.
///
/// Invariant: `date` is UTC midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedRecord {
    pub date: DateTime<Utc>,
    pub region_id: String,
    pub entity_id: Option<String>,
    pub value: f64,
    pub source: String,
}

/// Validated weather observation; carries two metrics so it gets its own type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedWeather {
    pub date: DateTime<Utc>,
    pub region_id: String,
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub source: String,
}
