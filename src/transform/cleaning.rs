//! Record validation and normalization
//!
//! Pure functions: one raw record in, one [`CleanedRecord`] or a
//! [`ValidationError`] out. Callers drop rejected records and tally them in
//! [`CleaningStats`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{
    CleanedRecord, CleanedWeather, RawExtraction, RawRainfall, RawTimestamp, RawValue,
    RawWaterReading, RawWeather,
};

const UNKNOWN_SOURCE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unparseable timestamp")]
    BadTimestamp,

    #[error("field `{0}` is not a finite number")]
    BadValue(&'static str),

    #[error("field `{field}` = {value} is outside the allowed range")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Inclusive bounds for a numeric field.
#[derive(Debug, Clone, Copy, Default)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Range {
    pub const UNBOUNDED: Range = Range { min: None, max: None };
    pub const NON_NEGATIVE: Range = Range { min: Some(0.0), max: None };
    pub const PERCENT: Range = Range { min: Some(0.0), max: Some(100.0) };

    fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Parse an ISO-8601 timestamp. Offset-less inputs are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Truncate any datetime to 00:00:00 UTC of its UTC day.
pub fn utc_midnight(dt: DateTime<Utc>) -> DateTime<Utc> {
    let naive = dt
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| dt.naive_utc());
    Utc.from_utc_datetime(&naive)
}

/// Normalize a raw timestamp to its UTC-midnight day key.
pub fn normalize_utc_midnight(raw: &RawTimestamp) -> Option<DateTime<Utc>> {
    let utc = match raw {
        RawTimestamp::Text(text) => parse_timestamp(text)?,
        RawTimestamp::Aware(dt) => dt.with_timezone(&Utc),
        RawTimestamp::Naive(naive) => Utc.from_utc_datetime(naive),
    };
    Some(utc_midnight(utc))
}

/// Cast to `f64` and check the optional range. Non-finite values are rejected.
pub fn safe_cast_float(
    raw: Option<&RawValue>,
    field: &'static str,
    range: Range,
) -> Result<f64, ValidationError> {
    let value = match raw.ok_or(ValidationError::MissingField(field))? {
        RawValue::Number(n) => *n,
        RawValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::BadValue(field))?,
    };
    if !value.is_finite() {
        return Err(ValidationError::BadValue(field));
    }
    if !range.contains(value) {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(value)
}

fn required_id(value: &Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn optional_id(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn day_key(raw: &Option<RawTimestamp>) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.as_ref().ok_or(ValidationError::MissingField("timestamp"))?;
    normalize_utc_midnight(raw).ok_or(ValidationError::BadTimestamp)
}

fn source_of(value: &Option<String>) -> String {
    optional_id(value).unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}

/// Well reading: `well_id` and `region_id` required, level may be negative (artesian).
pub fn clean_water_reading(row: &RawWaterReading) -> Result<CleanedRecord, ValidationError> {
    let well_id = required_id(&row.well_id, "well_id")?;
    let region_id = required_id(&row.region_id, "region_id")?;
    let date = day_key(&row.timestamp)?;
    let value = safe_cast_float(row.water_level.as_ref(), "water_level", Range::UNBOUNDED)?;

    Ok(CleanedRecord {
        date,
        region_id,
        entity_id: Some(well_id),
        value,
        source: source_of(&row.source),
    })
}

/// Rainfall report: amount must be non-negative.
pub fn clean_rainfall(row: &RawRainfall) -> Result<CleanedRecord, ValidationError> {
    let region_id = required_id(&row.region_id, "region_id")?;
    let date = day_key(&row.timestamp)?;
    let value = safe_cast_float(row.amount_mm.as_ref(), "amount_mm", Range::NON_NEGATIVE)?;

    Ok(CleanedRecord {
        date,
        region_id,
        entity_id: None,
        value,
        source: source_of(&row.source),
    })
}

pub fn clean_weather(row: &RawWeather) -> Result<CleanedWeather, ValidationError> {
    let region_id = required_id(&row.region_id, "region_id")?;
    let date = day_key(&row.timestamp)?;
    let temperature_c =
        safe_cast_float(row.temperature_c.as_ref(), "temperature_c", Range::UNBOUNDED)?;
    let humidity_percent =
        safe_cast_float(row.humidity_percent.as_ref(), "humidity_percent", Range::PERCENT)?;

    Ok(CleanedWeather {
        date,
        region_id,
        temperature_c,
        humidity_percent,
        source: source_of(&row.source),
    })
}

/// Pumping log: volume must be non-negative, well id is optional.
pub fn clean_extraction(row: &RawExtraction) -> Result<CleanedRecord, ValidationError> {
    let region_id = required_id(&row.region_id, "region_id")?;
    let date = day_key(&row.timestamp)?;
    let value = safe_cast_float(row.volume_liters.as_ref(), "volume_liters", Range::NON_NEGATIVE)?;

    Ok(CleanedRecord {
        date,
        region_id,
        entity_id: optional_id(&row.well_id),
        value,
        source: source_of(&row.source),
    })
}

/// Skip counters for one cleaning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleaningStats {
    pub seen: u64,
    pub kept: u64,
    pub missing_field: u64,
    pub bad_timestamp: u64,
    pub bad_value: u64,
    pub out_of_range: u64,
}

impl CleaningStats {
    /// Count the outcome and hand back the record if it survived.
    pub fn track<T>(&mut self, outcome: Result<T, ValidationError>) -> Option<T> {
        self.seen += 1;
        match outcome {
            Ok(record) => {
                self.kept += 1;
                Some(record)
            }
            Err(err) => {
                tracing::debug!(error = %err, "record dropped");
                match err {
                    ValidationError::MissingField(_) => self.missing_field += 1,
                    ValidationError::BadTimestamp => self.bad_timestamp += 1,
                    ValidationError::BadValue(_) => self.bad_value += 1,
                    ValidationError::OutOfRange { .. } => self.out_of_range += 1,
                }
                None
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.seen - self.kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, Timelike};
    use rstest::rstest;

    fn reading(ts: &str, level: RawValue) -> RawWaterReading {
        RawWaterReading {
            well_id: Some("w1".into()),
            region_id: Some("A".into()),
            timestamp: Some(ts.into()),
            water_level: Some(level),
            source: Some("sensor".into()),
        }
    }

    #[rstest]
    #[case("2024-03-01T23:59:59Z", 1)]
    #[case("2024-03-01T10:00:00", 1)]
    #[case("2024-03-01 10:00:00.250", 1)]
    #[case("2024-03-02T01:30:00+05:00", 1)]
    #[case("2024-03-01", 1)]
    fn test_timestamp_truncated_to_utc_midnight(#[case] ts: &str, #[case] day: u32) {
        let cleaned = clean_water_reading(&reading(ts, 4.0.into())).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap();
        assert_eq!(cleaned.date, expected);
        assert_eq!(cleaned.date.hour(), 0);
    }

    #[test]
    fn test_native_datetimes_accepted() {
        let naive = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(18, 0, 0)
            .unwrap();
        assert_eq!(
            normalize_utc_midnight(&RawTimestamp::Naive(naive)),
            Some(Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap())
        );

        let aware = FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 6, 20, 0, 0)
            .unwrap();
        assert_eq!(
            normalize_utc_midnight(&RawTimestamp::Aware(aware)),
            Some(Utc.with_ymd_and_hms(2024, 5, 7, 0, 0, 0).unwrap())
        );
    }

    #[rstest]
    #[case("not-a-date")]
    #[case("")]
    #[case("2024-13-01T00:00:00Z")]
    fn test_bad_timestamp_rejected(#[case] ts: &str) {
        assert_eq!(
            clean_water_reading(&reading(ts, 4.0.into())),
            Err(ValidationError::BadTimestamp)
        );
    }

    #[test]
    fn test_missing_identifiers_rejected() {
        let mut row = reading("2024-03-01T00:00:00Z", 4.0.into());
        row.well_id = Some("  ".into());
        assert_eq!(
            clean_water_reading(&row),
            Err(ValidationError::MissingField("well_id"))
        );

        let mut row = reading("2024-03-01T00:00:00Z", 4.0.into());
        row.region_id = None;
        assert_eq!(
            clean_water_reading(&row),
            Err(ValidationError::MissingField("region_id"))
        );
    }

    #[test]
    fn test_numeric_coercion() {
        let cleaned = clean_water_reading(&reading("2024-03-01", " -3.25 ".into())).unwrap();
        assert_eq!(cleaned.value, -3.25);
        assert_eq!(cleaned.entity_id.as_deref(), Some("w1"));

        assert_eq!(
            clean_water_reading(&reading("2024-03-01", "deep".into())),
            Err(ValidationError::BadValue("water_level"))
        );
        assert_eq!(
            clean_water_reading(&reading("2024-03-01", "NaN".into())),
            Err(ValidationError::BadValue("water_level"))
        );
    }

    #[test]
    fn test_negative_rainfall_rejected() {
        let row = RawRainfall {
            region_id: Some("A".into()),
            timestamp: Some("2024-03-01T06:00:00Z".into()),
            amount_mm: Some((-0.5).into()),
            source: None,
        };
        assert!(matches!(
            clean_rainfall(&row),
            Err(ValidationError::OutOfRange { field: "amount_mm", .. })
        ));

        let ok = RawRainfall {
            amount_mm: Some(0.0.into()),
            ..row
        };
        let cleaned = clean_rainfall(&ok).unwrap();
        assert_eq!(cleaned.value, 0.0);
        assert_eq!(cleaned.source, "unknown");
    }

    #[test]
    fn test_weather_humidity_bounds() {
        let row = RawWeather {
            region_id: Some("A".into()),
            timestamp: Some("2024-03-01T12:00:00Z".into()),
            temperature_c: Some(30.0.into()),
            humidity_percent: Some(120.0.into()),
            source: None,
        };
        assert!(matches!(
            clean_weather(&row),
            Err(ValidationError::OutOfRange { field: "humidity_percent", .. })
        ));
    }

    #[test]
    fn test_extraction_well_optional() {
        let row = RawExtraction {
            region_id: Some("A".into()),
            well_id: None,
            timestamp: Some("2024-03-01T12:00:00Z".into()),
            volume_liters: Some("1500".into()),
            source: Some("meter".into()),
        };
        let cleaned = clean_extraction(&row).unwrap();
        assert_eq!(cleaned.value, 1500.0);
        assert!(cleaned.entity_id.is_none());
    }

    #[test]
    fn test_stats_tally() {
        let mut stats = CleaningStats::default();
        let rows = vec![
            reading("2024-03-01", 1.0.into()),
            reading("garbage", 1.0.into()),
            reading("2024-03-01", "x".into()),
            RawWaterReading::default(),
        ];
        let kept: Vec<_> = rows
            .iter()
            .filter_map(|r| stats.track(clean_water_reading(r)))
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(stats.seen, 4);
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.bad_timestamp, 1);
        assert_eq!(stats.bad_value, 1);
        assert_eq!(stats.missing_field, 1);
        assert_eq!(stats.dropped(), 3);
    }
}
