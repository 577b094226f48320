//! Forecast endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{error::ApiError, AppState};
use crate::domain::{ExtractionSchedule, ForecastRow};
use crate::store::{find_all, Collection, Filter, Query, SortOrder};

/// Persisted rows returned per region.
pub const MAX_FORECAST_ROWS: usize = 30;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(length(min = 1))]
    pub region_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ScenarioRequest {
    #[validate(length(min = 1))]
    pub region_id: String,
    #[validate(custom(function = "validate_schedule"))]
    pub extraction: ExtractionSchedule,
}

fn validate_schedule(schedule: &ExtractionSchedule) -> Result<(), validator::ValidationError> {
    let valid = match schedule {
        ExtractionSchedule::Uniform(v) => v.is_finite() && *v >= 0.0,
        ExtractionSchedule::PerStep(values) => values.iter().all(|v| v.is_finite() && *v >= 0.0),
    };
    if valid {
        Ok(())
    } else {
        Err(validator::ValidationError::new("extraction_volume"))
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub status: &'static str,
    pub rows: usize,
    pub regions: Vec<String>,
}

/// GET /api/v1/forecasts/:region_id
pub async fn get_forecasts(
    State(st): State<AppState>,
    Path(region_id): Path<String>,
) -> Result<Json<Vec<ForecastRow>>, ApiError> {
    let query = Query::new(Filter::all().region(region_id))
        .sorted(SortOrder::Ascending)
        .limit(MAX_FORECAST_ROWS);
    let rows = find_all(st.pipeline.store().as_ref(), Collection::DailyForecasts, query).await?;
    Ok(Json(rows))
}

/// POST /api/v1/forecasts/generate
pub async fn generate_forecast(
    State(st): State<AppState>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    payload.validate()?;
    let rows = st
        .pipeline
        .forecast_engine()
        .run_batch(payload.region_id.as_deref())
        .await?;

    let mut regions: Vec<String> = rows.iter().map(|r| r.region_id.clone()).collect();
    regions.sort();
    regions.dedup();
    Ok(Json(GenerateResponse {
        status: "success",
        rows: rows.len(),
        regions,
    }))
}

/// POST /api/v1/forecasts/scenario
pub async fn scenario_forecast(
    State(st): State<AppState>,
    Json(payload): Json<ScenarioRequest>,
) -> Result<Json<Vec<ForecastRow>>, ApiError> {
    payload.validate()?;
    let rows = st
        .pipeline
        .forecast_engine()
        .run_scenario(&payload.region_id, &payload.extraction)
        .await?;
    Ok(Json(rows))
}
