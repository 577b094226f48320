pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod ml;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod transform;

pub use error::{PipelineError, PipelineResult};
