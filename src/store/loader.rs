//! Partition overwrite
//!
//! Replacing a slice is a delete followed by an insert, handed to the backend
//! as one atomic [`Replacement`] batch. A failed batch leaves the previous
//! partitions in place, and a repeated batch yields the same state, so it is
//! the only write the pipeline retries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{to_documents, Collection, Datastore, Filter, Replacement, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    pub deleted: u64,
    pub inserted: u64,
}

#[derive(Clone)]
pub struct PartitionLoader {
    store: Arc<dyn Datastore>,
    max_attempts: usize,
    retry_delay: Duration,
}

impl PartitionLoader {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self {
            store,
            max_attempts: 1,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, max_attempts: usize, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Replace every document of `collection` dated within `[date, date + 1d)`.
    pub async fn overwrite_day<T: Serialize>(
        &self,
        collection: Collection,
        date: DateTime<Utc>,
        rows: &[T],
    ) -> Result<LoadReport, StoreError> {
        self.overwrite(collection, Filter::all().day(date), rows).await
    }

    /// Replace the documents matching `filter` with `rows`.
    pub async fn overwrite<T: Serialize>(
        &self,
        collection: Collection,
        filter: Filter,
        rows: &[T],
    ) -> Result<LoadReport, StoreError> {
        let replacement = Replacement::new(collection, filter, to_documents(rows)?);
        let reports = self.commit(vec![replacement]).await?;
        Ok(reports.into_iter().next().unwrap_or_default())
    }

    /// Apply several partition replacements as one unit.
    pub async fn commit(&self, replacements: Vec<Replacement>) -> Result<Vec<LoadReport>, StoreError> {
        let collections: Vec<Collection> = replacements.iter().map(|r| r.collection).collect();
        let mut attempt = 0;
        let mut delay = self.retry_delay;

        loop {
            attempt += 1;
            match self.store.replace(replacements.clone()).await {
                Ok(reports) => {
                    for (collection, report) in collections.iter().zip(&reports) {
                        info!(
                            collection = %collection,
                            deleted = report.deleted,
                            inserted = report.inserted,
                            "Partition overwritten"
                        );
                    }
                    return Ok(reports);
                }
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        collections = ?collections,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Partition overwrite failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}
