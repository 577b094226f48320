//! Datastore contract
//!
//! The pipeline reads and writes schemaless JSON documents grouped into named
//! collections. Backends only need region and date filtering, ordering by the
//! collection's date field, and the write primitives below. Reads are
//! returned as a stream of pages so callers can fold large collections
//! without materializing them.
//!
//! [`Datastore::replace`] is the only write the pipeline uses for derived
//! collections: a batch of delete-then-insert pairs that either lands as a
//! whole or leaves the store untouched.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{BoxStream, TryStreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

pub mod loader;
pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use loader::{LoadReport, PartitionLoader};
pub use memory::MemoryStore;
#[cfg(feature = "db")]
pub use pg::PgStore;

/// One stored record.
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Snapshot I/O error at {path}: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Document is not a JSON object")]
    NotAnObject,

    #[cfg(feature = "db")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, AsRefStr, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
    WaterReadings,
    Rainfall,
    Weather,
    Extraction,
    Regions,
    DailyRegionGroundwater,
    DailyRegionRainfall,
    DailyRegionWeather,
    DailyRegionExtraction,
    RegionFeatureStore,
    DailyForecasts,
}

impl Collection {
    /// Field holding the document's date, if the collection is time indexed.
    pub fn date_field(&self) -> Option<&'static str> {
        match self {
            Collection::WaterReadings
            | Collection::Rainfall
            | Collection::Weather
            | Collection::Extraction => Some("timestamp"),
            Collection::Regions => None,
            Collection::DailyForecasts => Some("forecast_date"),
            _ => Some("date"),
        }
    }
}

/// Conjunction of optional region and date predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub region_ids: Option<Vec<String>>,
    /// Inclusive lower bound
    pub date_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub date_to: Option<DateTime<Utc>>,
    /// Exact date membership
    pub dates: Option<Vec<DateTime<Utc>>>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn region(mut self, region_id: impl Into<String>) -> Self {
        self.region_ids = Some(vec![region_id.into()]);
        self
    }

    pub fn regions(mut self, region_ids: impl IntoIterator<Item = String>) -> Self {
        self.region_ids = Some(region_ids.into_iter().collect());
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    /// The half-open day `[date, date + 1d)`.
    pub fn day(self, date: DateTime<Utc>) -> Self {
        self.between(date, date + Duration::days(1))
    }

    pub fn on_dates(mut self, dates: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        self.dates = Some(dates.into_iter().collect());
        self
    }

    pub fn has_date_predicate(&self) -> bool {
        self.date_from.is_some() || self.date_to.is_some() || self.dates.is_some()
    }

    /// Evaluate against already extracted keys.
    pub fn matches(&self, region_id: Option<&str>, date: Option<DateTime<Utc>>) -> bool {
        if let Some(ids) = &self.region_ids {
            match region_id {
                Some(id) if ids.iter().any(|candidate| candidate == id) => {}
                _ => return false,
            }
        }
        if !self.has_date_predicate() {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        if self.date_from.is_some_and(|from| date < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| date >= to) {
            return false;
        }
        if let Some(dates) = &self.dates {
            return dates.contains(&date);
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Filter plus ordering by (date, region) and an optional row cap.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Filter,
    pub sort: Option<SortOrder>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: None,
            limit: None,
        }
    }

    pub fn sorted(mut self, order: SortOrder) -> Self {
        self.sort = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Insert or replace the document whose fields equal `key`.
#[derive(Debug, Clone)]
pub struct Upsert {
    pub key: Document,
    pub document: Document,
}

/// Documents that take the place of everything `filter` matches in
/// `collection`.
#[derive(Debug, Clone)]
pub struct Replacement {
    pub collection: Collection,
    pub filter: Filter,
    pub documents: Vec<Document>,
}

impl Replacement {
    pub fn new(collection: Collection, filter: Filter, documents: Vec<Document>) -> Self {
        Self {
            collection,
            filter,
            documents,
        }
    }

    /// Replace the half-open day `[date, date + 1d)` with `rows`.
    pub fn day<T: Serialize>(collection: Collection, date: DateTime<Utc>, rows: &[T]) -> Result<Self, StoreError> {
        Ok(Self::new(collection, Filter::all().day(date), to_documents(rows)?))
    }
}

#[async_trait]
pub trait Datastore: Send + Sync {
    /// Stream matching documents in pages.
    fn find(&self, collection: Collection, query: Query) -> BoxStream<'_, Result<Vec<Document>, StoreError>>;

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError>;

    async fn insert_many(&self, collection: Collection, documents: Vec<Document>) -> Result<u64, StoreError>;

    async fn bulk_upsert(&self, collection: Collection, upserts: Vec<Upsert>) -> Result<u64, StoreError>;

    /// Apply every replacement in order, atomically. On error nothing is
    /// visible. Reports come back in input order.
    async fn replace(&self, replacements: Vec<Replacement>) -> Result<Vec<LoadReport>, StoreError>;

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        let pages: Vec<Vec<Document>> = self.find(collection, Query::new(filter.clone())).try_collect().await?;
        Ok(pages.iter().map(|page| page.len() as u64).sum())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.count(Collection::Regions, &Filter::all()).await.map(|_| ())
    }

    /// Release backend resources. Called once when the process is done.
    async fn close(&self) {}
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject),
    }
}

pub fn to_documents<T: Serialize>(values: &[T]) -> Result<Vec<Document>, StoreError> {
    values.iter().map(to_document).collect()
}

pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// Collect and decode every matching document.
pub async fn find_all<T: DeserializeOwned>(
    store: &dyn Datastore,
    collection: Collection,
    query: Query,
) -> Result<Vec<T>, StoreError> {
    let mut pages = store.find(collection, query);
    let mut out = Vec::new();
    while let Some(page) = pages.try_next().await? {
        for document in page {
            out.push(from_document(document)?);
        }
    }
    Ok(out)
}

/// Region id of a document, if present.
pub fn document_region(document: &Document) -> Option<&str> {
    document.get("region_id").and_then(Value::as_str)
}

/// Parsed date of a document for the collection's date field.
pub fn document_date(collection: Collection, document: &Document) -> Option<DateTime<Utc>> {
    let field = collection.date_field()?;
    document
        .get(field)
        .and_then(Value::as_str)
        .and_then(crate::transform::cleaning::parse_timestamp)
}
