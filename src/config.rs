use anyhow::Result;
use figment::{providers::{Env, Format, Serialized, Toml}, Figment};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::ml::ModelType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    pub forecast: ForecastConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8002,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Snapshot file for the memory backend; `None` keeps everything in process.
    pub snapshot_path: Option<PathBuf>,
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Documents fetched per page when streaming a collection.
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            snapshot_path: None,
            url: "postgres://localhost/groundwater".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            page_size: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub dir: PathBuf,
    pub registry_file: String,
    pub candidates_file: String,
    pub artifacts_subdir: String,
    pub archive_subdir: String,
    /// Artifacts kept per region by `cleanup`, active ones are always kept.
    pub retention_count: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models/v1"),
            registry_file: "model_registry.json".to_string(),
            candidates_file: "evaluation_summary.json".to_string(),
            artifacts_subdir: "artifacts".to_string(),
            archive_subdir: "archive".to_string(),
            retention_count: 3,
        }
    }
}

impl RegistryConfig {
    pub fn registry_path(&self) -> PathBuf {
        self.dir.join(&self.registry_file)
    }

    pub fn candidates_path(&self) -> PathBuf {
        self.dir.join(&self.candidates_file)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join(&self.artifacts_subdir)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.dir.join(&self.archive_subdir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Days of stored aggregates read before the target date.
    pub lookback_days: i64,
    /// Decimal places applied to every emitted float feature.
    pub precision: u32,
    pub default_temperature_c: f64,
    pub default_humidity_percent: f64,
    pub default_permeability: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lookback_days: 68,
            precision: 4,
            default_temperature_c: 25.0,
            default_humidity_percent: 50.0,
            default_permeability: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub model_type: ModelType,
    pub min_history_days: usize,
    pub train_split_ratio: f64,
    pub ridge_lambda: f64,
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::LinearRegression,
            min_history_days: 90,
            train_split_ratio: 0.8,
            ridge_lambda: 1e-6,
            n_trees: 100,
            max_depth: Some(15),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub horizon_days: u32,
    pub history_window_days: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self { horizon_days: 7, history_window_days: 60 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RainfallStrategy {
    Streaming,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rainfall_strategy: RainfallStrategy,
    /// Attempts for the idempotent partition overwrite. 1 disables retry.
    pub load_attempts: usize,
    pub retry_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rainfall_strategy: RainfallStrategy::Streaming,
            load_attempts: 1,
            retry_delay_ms: 500,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("GWF__").split("__"));
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.forecast.horizon_days, 7);
        assert_eq!(cfg.training.min_history_days, 90);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(
            cfg.registry.registry_path(),
            PathBuf::from("models/v1/model_registry.json")
        );
    }

    #[test]
    fn test_toml_overrides_keep_other_defaults() {
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(
            r#"
            [forecast]
            horizon_days = 14

            [training]
            model_type = "random_forest"
            "#,
        ));
        let cfg: Config = figment.extract().unwrap();
        assert_eq!(cfg.forecast.horizon_days, 14);
        assert_eq!(cfg.forecast.history_window_days, 60);
        assert_eq!(cfg.training.model_type, ModelType::RandomForest);
        assert_eq!(cfg.server.port, 8002);
    }
}
