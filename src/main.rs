use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

use groundwater_forecast::{
    api,
    config::{Config, StoreBackend, StoreConfig},
    domain::ExtractionSchedule,
    pipeline::Pipeline,
    store::{Datastore, MemoryStore},
    telemetry,
};

#[derive(Parser)]
#[command(name = "gwf", version, about = "Groundwater aggregation, training and forecasting jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate one day of raw readings
    Aggregate {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Generate feature rows for one day
    Features {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Aggregate then generate features
    Daily {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Train per region models and write the candidate summary
    Train,
    /// Gate candidates into the model registry
    Promote,
    /// Batch forecast, or a scenario with `--extraction` / `--schedule`
    Forecast {
        #[arg(long)]
        region: Option<String>,
        /// Liters per day applied to every step
        #[arg(long, conflicts_with = "schedule")]
        extraction: Option<f64>,
        /// Liters per step, comma separated
        #[arg(long, value_delimiter = ',')]
        schedule: Option<Vec<f64>>,
    },
    /// Archive artifacts outside the retention window
    Cleanup,
    /// Serve the HTTP API
    Serve,
    /// daily, train, promote and forecast in sequence
    RunAll {
        #[arg(long)]
        date: NaiveDate,
    },
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Datastore>> {
    match config.backend {
        StoreBackend::Memory => {
            let store = match &config.snapshot_path {
                Some(path) => MemoryStore::open(path, config.page_size)
                    .with_context(|| format!("Failed to open snapshot {}", path.display()))?,
                None => {
                    warn!("Memory datastore without snapshot path, nothing outlives this process");
                    MemoryStore::new(config.page_size)
                }
            };
            Ok(Arc::new(store))
        }
        #[cfg(feature = "db")]
        StoreBackend::Postgres => {
            let store = groundwater_forecast::store::PgStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "db"))]
        StoreBackend::Postgres => anyhow::bail!("the postgres backend requires the `db` feature"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let cfg = Config::load()?;
    let store = open_store(&cfg.store).await?;
    let pipeline = Pipeline::new(cfg.clone(), store.clone());

    let result = run(cli.command, &cfg, pipeline).await;
    store.close().await;
    result
}

async fn run(command: Command, cfg: &Config, pipeline: Pipeline) -> Result<()> {
    match command {
        Command::Aggregate { date } => print_json(&pipeline.run_aggregation(midnight(date)).await?)?,
        Command::Features { date } => print_json(&pipeline.run_feature_generation(midnight(date)).await?)?,
        Command::Daily { date } => print_json(&pipeline.run_daily(midnight(date)).await?)?,
        Command::Train => print_json(&pipeline.run_training().await?)?,
        Command::Promote => {
            let report = pipeline.run_promotion()?;
            info!(promoted = ?report.promoted, "Promotion complete");
            for rejection in &report.rejected {
                println!("rejected {}: {}", rejection.region_id, rejection.reason);
            }
            println!("promoted {} region(s), {} active", report.promoted.len(), report.active_count);
        }
        Command::Forecast {
            region,
            extraction,
            schedule,
        } => {
            let schedule = match (extraction, schedule) {
                (Some(volume), _) => Some(ExtractionSchedule::Uniform(volume)),
                (None, Some(volumes)) => Some(ExtractionSchedule::PerStep(volumes)),
                (None, None) => None,
            };
            let rows = pipeline.run_forecast(region.as_deref(), schedule.as_ref()).await?;
            if schedule.is_some() {
                print_json(&rows)?;
            } else {
                println!("saved {} forecast row(s)", rows.len());
            }
        }
        Command::Cleanup => {
            let report = pipeline.run_cleanup()?;
            println!(
                "kept {}, archived {}, failed {}",
                report.kept,
                report.archived.len(),
                report.failed.len()
            );
        }
        Command::Serve => {
            let addr = cfg.server.socket_addr()?;
            if cfg.server.host == "0.0.0.0" {
                warn!("Server binding to 0.0.0.0, the API is reachable from the network");
            }
            let app = api::router(api::AppState::new(pipeline));
            info!(%addr, "starting groundwater forecast API");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(telemetry::shutdown_signal())
                .await?;
            warn!("shutdown complete");
        }
        Command::RunAll { date } => {
            let summary = pipeline.run_all(midnight(date)).await?;
            println!(
                "candidates {}, promoted {}, forecasts {}",
                summary.training.candidates,
                summary.promotion.promoted.len(),
                summary.forecasts
            );
        }
    }
    Ok(())
}
