//! Daily aggregation
//!
//! Streaming aggregators keep one running accumulator per (region, day) and
//! never retain individual readings, so memory grows with the number of
//! distinct region-days rather than with input volume. Batch group-by variants
//! are provided for small, bounded inputs and produce identical output.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::round_to;
use crate::domain::{
    CleanedRecord, CleanedWeather, ExtractionDaily, GroundwaterDaily, RainfallDaily, WeatherDaily,
};

/// Decimal places of every aggregated statistic.
pub const AGGREGATE_PRECISION: u32 = 2;

type DayKey = (String, DateTime<Utc>);

/// Incremental per-(region, day) reducer.
pub trait DailyAggregator {
    type Input;
    type Output;

    /// Fold one record in. Amortized O(1).
    fn consume(&mut self, record: Self::Input);

    /// Number of distinct (region, day) groups held.
    fn group_count(&self) -> usize;

    /// Emit one row per group, ordered by region then date.
    fn finalize(self) -> Vec<Self::Output>;
}

fn round2(value: f64) -> f64 {
    round_to(value, AGGREGATE_PRECISION)
}

#[derive(Debug, Clone)]
struct LevelStats {
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
    entities: HashSet<String>,
}

impl LevelStats {
    fn new(value: f64) -> Self {
        Self {
            sum: 0.0,
            count: 0,
            min: value,
            max: value,
            entities: HashSet::new(),
        }
    }

    fn push(&mut self, value: f64, entity: Option<String>) {
        self.sum += value;
        self.count += 1;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        if let Some(entity) = entity {
            self.entities.insert(entity);
        }
    }

    fn merge(&mut self, other: LevelStats) {
        self.sum += other.sum;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.entities.extend(other.entities);
    }
}

/// Streaming groundwater aggregator.
#[derive(Debug, Default)]
pub struct GroundwaterStreamAggregator {
    groups: HashMap<DayKey, LevelStats>,
}

impl GroundwaterStreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine partial aggregates, e.g. from disjoint input shards.
    pub fn merge(&mut self, other: GroundwaterStreamAggregator) {
        for (key, stats) in other.groups {
            match self.groups.get_mut(&key) {
                Some(existing) => existing.merge(stats),
                None => {
                    self.groups.insert(key, stats);
                }
            }
        }
    }
}

impl DailyAggregator for GroundwaterStreamAggregator {
    type Input = CleanedRecord;
    type Output = GroundwaterDaily;

    fn consume(&mut self, record: CleanedRecord) {
        let value = record.value;
        self.groups
            .entry((record.region_id, record.date))
            .or_insert_with(|| LevelStats::new(value))
            .push(value, record.entity_id);
    }

    fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn finalize(self) -> Vec<GroundwaterDaily> {
        self.groups
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|((region_id, date), stats)| GroundwaterDaily {
                region_id,
                date,
                avg_water_level: round2(stats.sum / stats.count as f64),
                min_water_level: round2(stats.min),
                max_water_level: round2(stats.max),
                reading_count: stats.count,
                reporting_entity_count: stats.entities.len() as u64,
            })
            .collect()
    }
}

/// Collect-then-group groundwater aggregation.
pub fn aggregate_groundwater_batch(records: &[CleanedRecord]) -> Vec<GroundwaterDaily> {
    records
        .iter()
        .into_group_map_by(|r| (r.region_id.clone(), r.date))
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .map(|((region_id, date), rows)| {
            let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
            let entities: HashSet<&str> = rows.iter().filter_map(|r| r.entity_id.as_deref()).collect();
            GroundwaterDaily {
                region_id,
                date,
                avg_water_level: round2(values.iter().sum::<f64>() / values.len() as f64),
                min_water_level: round2(values.iter().copied().fold(f64::INFINITY, f64::min)),
                max_water_level: round2(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                reading_count: values.len() as u64,
                reporting_entity_count: entities.len() as u64,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
struct RainStats {
    sum: f64,
    count: u64,
    max: f64,
    sources: BTreeMap<String, u64>,
}

fn rainfall_row(region_id: String, date: DateTime<Utc>, stats: RainStats) -> RainfallDaily {
    // BTreeMap iterates in key order, so a strict `>` keeps the smallest name on ties.
    let mut primary: Option<(&String, u64)> = None;
    for (source, count) in &stats.sources {
        if primary.map_or(true, |(_, best)| *count > best) {
            primary = Some((source, *count));
        }
    }
    let primary_source = primary
        .map(|(s, _)| s.clone())
        .unwrap_or_else(|| "unknown".to_string());

    RainfallDaily {
        region_id,
        date,
        total_mm: round2(stats.sum),
        max_single_reading_mm: round2(stats.max),
        intensity_mm: round2(stats.sum / stats.count as f64),
        reading_count: stats.count,
        source_diversity_count: stats.sources.len() as u64,
        primary_source,
        data_sources: stats.sources.into_keys().collect(),
    }
}

/// Streaming rainfall aggregator.
#[derive(Debug, Default)]
pub struct RainfallStreamAggregator {
    groups: HashMap<DayKey, RainStats>,
}

impl RainfallStreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DailyAggregator for RainfallStreamAggregator {
    type Input = CleanedRecord;
    type Output = RainfallDaily;

    fn consume(&mut self, record: CleanedRecord) {
        let stats = self.groups.entry((record.region_id, record.date)).or_default();
        stats.sum += record.value;
        if stats.count == 0 || record.value > stats.max {
            stats.max = record.value;
        }
        stats.count += 1;
        *stats.sources.entry(record.source).or_insert(0) += 1;
    }

    fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn finalize(self) -> Vec<RainfallDaily> {
        self.groups
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|((region_id, date), stats)| rainfall_row(region_id, date, stats))
            .collect()
    }
}

/// Collect-then-group rainfall aggregation for bounded daily volumes.
pub fn aggregate_rainfall_batch(records: &[CleanedRecord]) -> Vec<RainfallDaily> {
    records
        .iter()
        .into_group_map_by(|r| (r.region_id.clone(), r.date))
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .map(|((region_id, date), rows)| {
            let stats = RainStats {
                sum: rows.iter().map(|r| r.value).sum(),
                count: rows.len() as u64,
                max: rows.iter().map(|r| r.value).fold(f64::NEG_INFINITY, f64::max),
                sources: rows
                    .iter()
                    .map(|r| r.source.clone())
                    .counts()
                    .into_iter()
                    .map(|(s, c)| (s, c as u64))
                    .collect(),
            };
            rainfall_row(region_id, date, stats)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
struct WeatherStats {
    temperature_sum: f64,
    humidity_sum: f64,
    count: u64,
}

/// Streaming daily-mean weather aggregator.
#[derive(Debug, Default)]
pub struct WeatherStreamAggregator {
    groups: HashMap<DayKey, WeatherStats>,
}

impl WeatherStreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DailyAggregator for WeatherStreamAggregator {
    type Input = CleanedWeather;
    type Output = WeatherDaily;

    fn consume(&mut self, record: CleanedWeather) {
        let stats = self.groups.entry((record.region_id, record.date)).or_default();
        stats.temperature_sum += record.temperature_c;
        stats.humidity_sum += record.humidity_percent;
        stats.count += 1;
    }

    fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn finalize(self) -> Vec<WeatherDaily> {
        self.groups
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|((region_id, date), stats)| WeatherDaily {
                region_id,
                date,
                avg_temperature_c: round2(stats.temperature_sum / stats.count as f64),
                avg_humidity_percent: round2(stats.humidity_sum / stats.count as f64),
                reading_count: stats.count,
            })
            .collect()
    }
}

/// Streaming daily pumped-volume aggregator.
#[derive(Debug, Default)]
pub struct ExtractionStreamAggregator {
    groups: HashMap<DayKey, (f64, u64, HashSet<String>)>,
}

impl ExtractionStreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DailyAggregator for ExtractionStreamAggregator {
    type Input = CleanedRecord;
    type Output = ExtractionDaily;

    fn consume(&mut self, record: CleanedRecord) {
        let (sum, count, wells) = self.groups.entry((record.region_id, record.date)).or_default();
        *sum += record.value;
        *count += 1;
        if let Some(well) = record.entity_id {
            wells.insert(well);
        }
    }

    fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn finalize(self) -> Vec<ExtractionDaily> {
        self.groups
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|((region_id, date), (sum, count, wells))| ExtractionDaily {
                region_id,
                date,
                total_volume_liters: round2(sum),
                reading_count: count,
                reporting_entity_count: wells.len() as u64,
            })
            .collect()
    }
}
