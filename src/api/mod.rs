pub mod error;
pub mod forecast;
pub mod health;
pub mod pipeline;

use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::pipeline::{Pipeline, PipelineGuard};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub guard: PipelineGuard,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            guard: PipelineGuard::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.pipeline.config().server.request_timeout_secs);
    let v1 = Router::new()
        .route("/forecasts/generate", post(forecast::generate_forecast))
        .route("/forecasts/scenario", post(forecast::scenario_forecast))
        .route("/forecasts/:region_id", get(forecast::get_forecasts))
        .route("/pipeline/trigger", post(pipeline::trigger_pipeline))
        .route("/pipeline/status", get(pipeline::pipeline_status));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", v1)
        .with_state(state)
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}
