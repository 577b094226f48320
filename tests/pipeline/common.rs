use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::stream::BoxStream;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use groundwater_forecast::config::Config;
use groundwater_forecast::pipeline::Pipeline;
use groundwater_forecast::store::{
    find_all, Collection, Datastore, Document, Filter, LoadReport, MemoryStore, Query, Replacement,
    StoreError, Upsert,
};

pub fn day(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(offset)
}

fn stamp(offset: i64, hour: u32) -> String {
    (day(offset) + Duration::hours(i64::from(hour))).to_rfc3339()
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub store: Arc<MemoryStore>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.registry.dir = dir.path().join("models");
        tweak(&mut config);
        let store = Arc::new(MemoryStore::default());
        let pipeline = Pipeline::new(config, store.clone());
        Self { pipeline, store, dir }
    }

    pub async fn insert(&self, collection: Collection, docs: Vec<Value>) {
        let docs = docs
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        self.store.insert_many(collection, docs).await.unwrap();
    }

    pub async fn region(&self, region_id: &str, soil_type: &str) {
        self.insert(
            Collection::Regions,
            vec![json!({"region_id": region_id, "name": region_id, "soil_type": soil_type, "permeability_index": 0.4})],
        )
        .await;
    }

    pub async fn reading(&self, region_id: &str, well_id: &str, offset: i64, hour: u32, level: impl Into<Value>) {
        self.insert(
            Collection::WaterReadings,
            vec![json!({
                "well_id": well_id,
                "region_id": region_id,
                "timestamp": stamp(offset, hour),
                "water_level": level.into(),
                "source": "sensor",
            })],
        )
        .await;
    }

    pub async fn rain(&self, region_id: &str, offset: i64, amount_mm: f64, source: &str) {
        self.insert(
            Collection::Rainfall,
            vec![json!({
                "region_id": region_id,
                "timestamp": stamp(offset, 12),
                "amount_mm": amount_mm,
                "source": source,
            })],
        )
        .await;
    }

    pub async fn docs(&self, collection: Collection) -> Vec<Value> {
        find_all(&*self.store, collection, Query::default()).await.unwrap()
    }

    /// A pipeline over the same data whose writes to `collection` fail.
    pub fn failing_pipeline(&self, collection: Collection) -> Pipeline {
        let store = FailingStore {
            inner: self.store.clone(),
            fail_on: collection,
        };
        Pipeline::new(self.pipeline.config().clone(), Arc::new(store))
    }

    /// Run aggregation and feature generation for days `0..days`.
    pub async fn run_days(&self, days: i64) {
        for offset in 0..days {
            self.pipeline.run_daily(day(offset)).await.unwrap();
        }
    }
}

/// Rainfall with a five day cycle, never below the default evaporation loss.
pub fn cyclic_rain(offset: i64) -> f64 {
    5.0 + 4.0 * ((offset * 7) % 5) as f64
}

/// Level driven by the previous day's effective rainfall.
pub fn driven_level(offset: i64) -> f64 {
    if offset == 0 {
        return 10.0;
    }
    // default weather (25 C, 50 %) evaporates 0.625 mm
    10.0 + 0.5 * (cyclic_rain(offset - 1) - 0.625)
}

/// `days` of driven levels and cyclic rain for one region.
pub async fn seed_driven_region(h: &Harness, region_id: &str, days: i64) {
    h.region(region_id, "sandy_loam").await;
    for offset in 0..days {
        h.reading(region_id, "w1", offset, 6, driven_level(offset)).await;
        h.rain(region_id, offset, cyclic_rain(offset), "gauge").await;
    }
}

/// Delegates to a shared memory store but rejects any write that touches
/// `fail_on`.
pub struct FailingStore {
    inner: Arc<MemoryStore>,
    fail_on: Collection,
}

impl FailingStore {
    fn refuse(&self) -> StoreError {
        StoreError::Backend(format!("{} is unavailable", self.fail_on))
    }
}

#[async_trait]
impl Datastore for FailingStore {
    fn find(&self, collection: Collection, query: Query) -> BoxStream<'_, Result<Vec<Document>, StoreError>> {
        self.inner.find(collection, query)
    }

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.delete_many(collection, filter).await
    }

    async fn insert_many(&self, collection: Collection, documents: Vec<Document>) -> Result<u64, StoreError> {
        if collection == self.fail_on {
            return Err(self.refuse());
        }
        self.inner.insert_many(collection, documents).await
    }

    async fn bulk_upsert(&self, collection: Collection, upserts: Vec<Upsert>) -> Result<u64, StoreError> {
        self.inner.bulk_upsert(collection, upserts).await
    }

    async fn replace(&self, replacements: Vec<Replacement>) -> Result<Vec<LoadReport>, StoreError> {
        if replacements.iter().any(|r| r.collection == self.fail_on) {
            return Err(self.refuse());
        }
        self.inner.replace(replacements).await
    }
}
