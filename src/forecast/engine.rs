use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::recursive::{RecursiveForecaster, RegionForecast};
use crate::config::ForecastConfig;
use crate::domain::{ExtractionSchedule, FeatureRow, ForecastRow};
use crate::error::{PipelineError, PipelineResult};
use crate::ml::ArtifactStore;
use crate::registry::{Registry, RegistryEntry};
use crate::store::{find_all, Collection, Datastore, Filter, PartitionLoader, Query, SortOrder};

/// Loads active models and history, runs the recursive forecaster and, in
/// batch mode, overwrites the affected forecast partition.
pub struct ForecastEngine {
    store: Arc<dyn Datastore>,
    loader: PartitionLoader,
    artifacts: ArtifactStore,
    registry_path: PathBuf,
    forecaster: RecursiveForecaster,
    history_window_days: usize,
}

impl ForecastEngine {
    pub fn new(
        store: Arc<dyn Datastore>,
        loader: PartitionLoader,
        artifacts: ArtifactStore,
        registry_path: impl Into<PathBuf>,
        config: &ForecastConfig,
    ) -> Self {
        Self {
            store,
            loader,
            artifacts,
            registry_path: registry_path.into(),
            forecaster: RecursiveForecaster::new(config.horizon_days),
            history_window_days: config.history_window_days,
        }
    }

    /// Dry, no-pumping forecast for every active region (or one), persisted.
    pub async fn run_batch(&self, region_id: Option<&str>) -> PipelineResult<Vec<ForecastRow>> {
        let rows = self.compute(region_id, None).await?;
        if rows.is_empty() {
            info!(region_id = ?region_id, "No forecasts produced");
            return Ok(rows);
        }

        let regions: Vec<String> = rows.iter().map(|r| r.region_id.clone()).unique().collect();
        let dates: Vec<DateTime<Utc>> = rows.iter().map(|r| r.forecast_date).unique().collect();
        let filter = Filter::all().regions(regions.clone()).on_dates(dates);
        let report = self.loader.overwrite(Collection::DailyForecasts, filter, &rows).await?;
        info!(
            regions = regions.len(),
            written = report.inserted,
            replaced = report.deleted,
            "Batch forecast saved"
        );
        Ok(rows)
    }

    /// What-if forecast under a pumping schedule. Never persisted.
    pub async fn run_scenario(
        &self,
        region_id: &str,
        schedule: &ExtractionSchedule,
    ) -> PipelineResult<Vec<ForecastRow>> {
        let rows = self.compute(Some(region_id), Some(schedule)).await?;
        info!(region_id, steps = rows.len(), "Scenario forecast computed");
        Ok(rows)
    }

    async fn compute(
        &self,
        region_id: Option<&str>,
        schedule: Option<&ExtractionSchedule>,
    ) -> PipelineResult<Vec<ForecastRow>> {
        let registry = match Registry::load(&self.registry_path) {
            Ok(registry) => registry,
            Err(PipelineError::RegistryMissing(path)) => {
                warn!(path = %path.display(), "Model registry not found, no forecasts produced");
                return Ok(Vec::new());
            }
            Err(e) => {
                error!(error = %e, "Model registry unreadable, aborting forecast");
                return Err(e);
            }
        };

        let entries: Vec<&RegistryEntry> = registry
            .active()
            .filter(|e| region_id.map_or(true, |r| e.region_id == r))
            .sorted_by(|a, b| a.region_id.cmp(&b.region_id))
            .collect();
        if entries.is_empty() {
            warn!(region_id = ?region_id, "No active models");
            return Ok(Vec::new());
        }

        let created_at = Utc::now();
        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for entry in entries {
            let model = self
                .artifacts
                .load(&entry.artifact_reference)
                .map_err(|e| PipelineError::Artifact {
                    reference: entry.artifact_reference.clone(),
                    reason: format!("{e:#}"),
                })?;
            let history = self.history(&entry.region_id).await?;

            let region = RegionForecast {
                region_id: &entry.region_id,
                model: &model,
                feature_set: entry.feature_set,
                model_version: &entry.model_version,
                history: &history,
            };
            match self.forecaster.forecast(&region, schedule, created_at) {
                Ok(mut region_rows) => rows.append(&mut region_rows),
                Err(e) if e.is_region_scoped() => {
                    warn!(region_id = %entry.region_id, error = %e, "Skipping region");
                    skipped += 1;
                }
                Err(e) => {
                    error!(region_id = %entry.region_id, error = %e, "Forecast aborted");
                    return Err(e);
                }
            }
        }

        info!(
            rows = rows.len(),
            skipped,
            horizon_days = self.forecaster.horizon_days(),
            scenario = schedule.is_some(),
            "Forecast run finished"
        );
        Ok(rows)
    }

    /// The region's newest feature rows, oldest first.
    async fn history(&self, region_id: &str) -> PipelineResult<Vec<FeatureRow>> {
        let query = Query::new(Filter::all().region(region_id))
            .sorted(SortOrder::Descending)
            .limit(self.history_window_days);
        let mut rows: Vec<FeatureRow> = find_all(self.store.as_ref(), Collection::RegionFeatureStore, query).await?;
        rows.reverse();
        Ok(rows)
    }
}
