//! Pipeline jobs
//!
//! Each job is independently invocable and idempotent for its date. Jobs
//! share one datastore handle and the immutable [`Config`].

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod guard;

pub use guard::{PipelineGuard, PipelineStatus, RunPermit, RunRecord};

use crate::config::{Config, RainfallStrategy};
use crate::domain::{
    ExtractionSchedule, FeatureRow, ForecastRow, GroundwaterDaily, RainfallDaily, RawExtraction, RawRainfall,
    RawWaterReading, RawWeather, RegionDay, RegionMetadata, WeatherDaily, ExtractionDaily,
};
use crate::forecast::ForecastEngine;
use crate::ml::training::write_candidates;
use crate::ml::{ArtifactStore, ModelCandidate, ModelTrainer, TrainingOutcome};
use crate::registry::{cleanup_artifacts, CleanupReport, PromotionGate, PromotionReport};
use crate::store::{
    find_all, from_document, Collection, Datastore, Filter, PartitionLoader, Query, Replacement,
};
use crate::transform::cleaning::{clean_extraction, clean_rainfall, clean_water_reading, clean_weather};
use crate::transform::features::MIN_LOOKBACK_ROWS;
use crate::transform::{
    aggregate_rainfall_batch, CleaningStats, DailyAggregator, ExtractionStreamAggregator, FeatureEngineer,
    FeatureInputs, GroundwaterStreamAggregator, RainfallStreamAggregator, ValidationError,
    WeatherStreamAggregator,
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationReport {
    pub groundwater: usize,
    pub rainfall: usize,
    pub weather: usize,
    pub extraction: usize,
    pub unknown_regions: usize,
    pub cleaning: HashMap<&'static str, CleaningStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureReport {
    pub regions: usize,
    pub rows_written: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingReport {
    pub candidates: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub aggregation: AggregationReport,
    pub features: FeatureReport,
    pub training: TrainingReport,
    pub promotion: PromotionReport,
    pub forecasts: usize,
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    store: Arc<dyn Datastore>,
    loader: PartitionLoader,
}

impl Pipeline {
    pub fn new(config: Config, store: Arc<dyn Datastore>) -> Self {
        let loader = PartitionLoader::new(store.clone()).with_retry(
            config.pipeline.load_attempts,
            std::time::Duration::from_millis(config.pipeline.retry_delay_ms),
        );
        Self {
            config: Arc::new(config),
            store,
            loader,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    pub fn artifact_store(&self) -> ArtifactStore {
        ArtifactStore::new(self.config.registry.artifacts_dir())
    }

    pub fn forecast_engine(&self) -> ForecastEngine {
        ForecastEngine::new(
            self.store.clone(),
            self.loader.clone(),
            self.artifact_store(),
            self.config.registry.registry_path(),
            &self.config.forecast,
        )
    }

    async fn region_metadata(&self) -> Result<HashMap<String, RegionMetadata>> {
        let regions: Vec<RegionMetadata> = find_all(self.store.as_ref(), Collection::Regions, Query::default())
            .await
            .context("Failed to read region metadata")?;
        Ok(regions.into_iter().map(|r| (r.region_id.clone(), r)).collect())
    }

    /// Stream one day of a raw collection through `clean` into `sink`.
    async fn fold_raw<R, T, C, S>(
        &self,
        collection: Collection,
        date: DateTime<Utc>,
        clean: C,
        mut sink: S,
    ) -> Result<CleaningStats>
    where
        R: DeserializeOwned,
        C: Fn(&R) -> Result<T, ValidationError>,
        S: FnMut(T),
    {
        let mut stats = CleaningStats::default();
        let mut pages = self.store.find(collection, Query::new(Filter::all().day(date)));
        while let Some(page) = pages
            .try_next()
            .await
            .with_context(|| format!("Failed to read {collection}"))?
        {
            for document in page {
                let outcome = from_document::<R>(document)
                    .map_err(|_| ValidationError::BadValue("document"))
                    .and_then(|raw| clean(&raw));
                if let Some(record) = stats.track(outcome) {
                    sink(record);
                }
            }
        }
        info!(
            collection = %collection,
            processed = stats.seen,
            kept = stats.kept,
            skipped = stats.dropped(),
            "Cleaned raw collection"
        );
        Ok(stats)
    }

    /// Raw readings for `[date, date + 1d)` to the four daily collections.
    pub async fn run_aggregation(&self, date: DateTime<Utc>) -> Result<AggregationReport> {
        let date = crate::transform::cleaning::utc_midnight(date);
        info!(date = %date.date_naive(), "Starting daily aggregation");
        let regions = self.region_metadata().await?;
        let mut report = AggregationReport::default();

        let mut groundwater = GroundwaterStreamAggregator::new();
        let stats = self
            .fold_raw::<RawWaterReading, _, _, _>(Collection::WaterReadings, date, clean_water_reading, |r| {
                groundwater.consume(r)
            })
            .await?;
        report.cleaning.insert("water_readings", stats);

        let rainfall = match self.config.pipeline.rainfall_strategy {
            RainfallStrategy::Streaming => {
                let mut aggregator = RainfallStreamAggregator::new();
                let stats = self
                    .fold_raw::<RawRainfall, _, _, _>(Collection::Rainfall, date, clean_rainfall, |r| {
                        aggregator.consume(r)
                    })
                    .await?;
                report.cleaning.insert("rainfall", stats);
                aggregator.finalize()
            }
            RainfallStrategy::Batch => {
                let mut records = Vec::new();
                let stats = self
                    .fold_raw::<RawRainfall, _, _, _>(Collection::Rainfall, date, clean_rainfall, |r| records.push(r))
                    .await?;
                report.cleaning.insert("rainfall", stats);
                aggregate_rainfall_batch(&records)
            }
        };

        let mut weather = WeatherStreamAggregator::new();
        let stats = self
            .fold_raw::<RawWeather, _, _, _>(Collection::Weather, date, clean_weather, |r| weather.consume(r))
            .await?;
        report.cleaning.insert("weather", stats);

        let mut extraction = ExtractionStreamAggregator::new();
        let stats = self
            .fold_raw::<RawExtraction, _, _, _>(Collection::Extraction, date, clean_extraction, |r| {
                extraction.consume(r)
            })
            .await?;
        report.cleaning.insert("extraction", stats);

        let mut unknown = HashSet::new();
        let groundwater = known_regions(groundwater.finalize(), &regions, &mut unknown);
        let rainfall = known_regions(rainfall, &regions, &mut unknown);
        let weather = known_regions(weather.finalize(), &regions, &mut unknown);
        let extraction = known_regions(extraction.finalize(), &regions, &mut unknown);
        for region_id in &unknown {
            warn!(region_id = %region_id, "Skipping aggregates for region without metadata");
        }

        // The four partitions of a day land together or not at all.
        let partitions = vec![
            Replacement::day(Collection::DailyRegionGroundwater, date, &groundwater)?,
            Replacement::day(Collection::DailyRegionRainfall, date, &rainfall)?,
            Replacement::day(Collection::DailyRegionWeather, date, &weather)?,
            Replacement::day(Collection::DailyRegionExtraction, date, &extraction)?,
        ];
        self.loader
            .commit(partitions)
            .await
            .context("Failed to write daily aggregates")?;

        report.groundwater = groundwater.len();
        report.rainfall = rainfall.len();
        report.weather = weather.len();
        report.extraction = extraction.len();
        report.unknown_regions = unknown.len();
        info!(
            date = %date.date_naive(),
            groundwater = report.groundwater,
            rainfall = report.rainfall,
            weather = report.weather,
            extraction = report.extraction,
            unknown_regions = report.unknown_regions,
            "Daily aggregation finished"
        );
        Ok(report)
    }

    /// Feature rows dated `date`, computed from the stored daily aggregates.
    pub async fn run_feature_generation(&self, date: DateTime<Utc>) -> Result<FeatureReport> {
        let date = crate::transform::cleaning::utc_midnight(date);
        let lookback = self
            .config
            .features
            .lookback_days
            .max(MIN_LOOKBACK_ROWS as i64);
        let window = Filter::all().between(date - Duration::days(lookback), date + Duration::days(1));
        let store = self.store.as_ref();

        let groundwater: Vec<GroundwaterDaily> =
            find_all(store, Collection::DailyRegionGroundwater, Query::new(window.clone())).await?;
        let rainfall: Vec<RainfallDaily> =
            find_all(store, Collection::DailyRegionRainfall, Query::new(window.clone())).await?;
        let weather: Vec<WeatherDaily> =
            find_all(store, Collection::DailyRegionWeather, Query::new(window.clone())).await?;
        let extraction: Vec<ExtractionDaily> =
            find_all(store, Collection::DailyRegionExtraction, Query::new(window)).await?;
        let regions = self.region_metadata().await?;

        let inputs = FeatureInputs {
            groundwater: &groundwater,
            rainfall: &rainfall,
            weather: &weather,
            extraction: &extraction,
        };
        let rows: Vec<FeatureRow> = FeatureEngineer::new(self.config.features.clone())
            .generate(&inputs, &regions)
            .into_iter()
            .filter(|row| row.date == date)
            .collect();
        debug!(backbone_rows = groundwater.len(), "Loaded feature inputs");

        self.loader
            .overwrite_day(Collection::RegionFeatureStore, date, &rows)
            .await?;

        let report = FeatureReport {
            regions: rows.iter().map(|r| r.region_id.as_str()).collect::<HashSet<_>>().len(),
            rows_written: rows.len(),
        };
        info!(
            date = %date.date_naive(),
            regions = report.regions,
            written = report.rows_written,
            lookback_days = lookback,
            "Feature generation finished"
        );
        Ok(report)
    }

    pub async fn run_daily(&self, date: DateTime<Utc>) -> Result<(AggregationReport, FeatureReport)> {
        let aggregation = self.run_aggregation(date).await.context("Aggregation failed")?;
        let features = self
            .run_feature_generation(date)
            .await
            .context("Feature generation failed")?;
        Ok((aggregation, features))
    }

    /// Train every region from the full feature store and write the candidate
    /// summary.
    pub async fn run_training(&self) -> Result<TrainingReport> {
        let rows: Vec<FeatureRow> = find_all(self.store.as_ref(), Collection::RegionFeatureStore, Query::default())
            .await
            .context("Failed to read feature store")?;
        let trainer = ModelTrainer::new(self.config.training.clone(), self.artifact_store());
        let outcomes = trainer.train_all(&rows, Utc::now());

        let mut report = TrainingReport::default();
        let mut candidates: Vec<ModelCandidate> = Vec::new();
        for outcome in outcomes {
            match outcome {
                TrainingOutcome::Candidate(candidate) => candidates.push(candidate),
                TrainingOutcome::Skipped(_) => report.skipped += 1,
                TrainingOutcome::Failed(_) => report.failed += 1,
            }
        }
        report.candidates = candidates.len();
        write_candidates(&self.config.registry.candidates_path(), &candidates)?;
        info!(
            rows = rows.len(),
            candidates = report.candidates,
            skipped = report.skipped,
            failed = report.failed,
            "Training finished"
        );
        Ok(report)
    }

    pub fn run_promotion(&self) -> Result<PromotionReport> {
        let registry = &self.config.registry;
        let gate = PromotionGate::new(registry.registry_path(), registry.candidates_path());
        Ok(gate.run(Utc::now())?)
    }

    /// Batch forecast when `schedule` is `None`, scenario otherwise.
    pub async fn run_forecast(
        &self,
        region_id: Option<&str>,
        schedule: Option<&ExtractionSchedule>,
    ) -> Result<Vec<ForecastRow>> {
        let engine = self.forecast_engine();
        let rows = match (schedule, region_id) {
            (None, region) => engine.run_batch(region).await?,
            (Some(schedule), Some(region)) => engine.run_scenario(region, schedule).await?,
            (Some(_), None) => anyhow::bail!("A scenario forecast needs a region"),
        };
        Ok(rows)
    }

    pub fn run_cleanup(&self) -> Result<CleanupReport> {
        Ok(cleanup_artifacts(&self.config.registry)?)
    }

    /// daily, train, promote, forecast. Stops at the first failing stage.
    pub async fn run_all(&self, date: DateTime<Utc>) -> Result<RunSummary> {
        let (aggregation, features) = self.run_daily(date).await?;
        let training = self.run_training().await.context("Training failed")?;
        let promotion = self.run_promotion().context("Promotion failed")?;
        let forecasts = self.run_forecast(None, None).await.context("Forecast failed")?;
        info!(
            date = %date.date_naive(),
            candidates = training.candidates,
            promoted = promotion.promoted.len(),
            forecasts = forecasts.len(),
            "Pipeline run finished"
        );
        Ok(RunSummary {
            aggregation,
            features,
            training,
            promotion,
            forecasts: forecasts.len(),
        })
    }
}

fn known_regions<T: RegionDay>(
    rows: Vec<T>,
    regions: &HashMap<String, RegionMetadata>,
    unknown: &mut HashSet<String>,
) -> Vec<T> {
    rows.into_iter()
        .filter(|row| {
            let known = regions.contains_key(row.region_id());
            if !known {
                unknown.insert(row.region_id().to_string());
            }
            known
        })
        .collect()
}
