//! Pipeline trigger and status

use axum::{extract::State, http::StatusCode, Json};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{error, info};

use super::{error::ApiError, AppState};
use crate::pipeline::PipelineStatus;

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    /// Defaults to today (UTC)
    pub date: Option<NaiveDate>,
}

/// POST /api/v1/pipeline/trigger
///
/// Starts a full run in the background. 409 while a run is in progress.
pub async fn trigger_pipeline(
    State(st): State<AppState>,
    Json(payload): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<PipelineStatus>), ApiError> {
    let date = payload
        .date
        .unwrap_or_else(|| Utc::now().date_naive())
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ApiError::BadRequest("invalid date".to_string()))?
        .and_utc();

    let permit = st.guard.try_acquire(date)?;
    let pipeline = st.pipeline.clone();
    tokio::spawn(async move {
        info!(date = %date.date_naive(), "Pipeline run triggered");
        let outcome = pipeline.run_all(date).await;
        if let Err(e) = &outcome {
            error!(error = %format!("{e:#}"), "Pipeline run failed");
        }
        permit.finish(&outcome.map_err(|e| format!("{e:#}")));
    });

    Ok((StatusCode::ACCEPTED, Json(st.guard.status())))
}

/// GET /api/v1/pipeline/status
pub async fn pipeline_status(State(st): State<AppState>) -> Json<PipelineStatus> {
    Json(st.guard.status())
}
