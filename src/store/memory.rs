//! In-process datastore
//!
//! Collections live behind a `parking_lot::RwLock`. With a snapshot path the
//! whole store is written to a JSON file on every mutation (temp file plus
//! rename) before the new state becomes visible, which lets separate CLI
//! invocations share state.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    document_date, document_region, Collection, Datastore, Document, Filter, LoadReport, Query,
    Replacement, SortOrder, StoreError, Upsert,
};

type Collections = BTreeMap<String, Vec<Document>>;

pub struct MemoryStore {
    collections: RwLock<Collections>,
    snapshot_path: Option<PathBuf>,
    page_size: usize,
    // One writer at a time, so snapshot order follows mutation order.
    write_gate: tokio::sync::Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(5000)
    }
}

impl MemoryStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            collections: RwLock::new(Collections::new()),
            snapshot_path: None,
            page_size: page_size.max(1),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a snapshot-backed store, loading the file if it exists.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let collections = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| StoreError::Snapshot {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str::<Collections>(&text)?
        } else {
            Collections::new()
        };
        debug!(path = %path.display(), collections = collections.len(), "Opened memory store");

        let mut store = Self::new(page_size);
        store.collections = RwLock::new(collections);
        store.snapshot_path = Some(path);
        Ok(store)
    }

    fn matching(&self, collection: Collection, filter: &Filter) -> Vec<Document> {
        let guard = self.collections.read();
        guard
            .get(collection.as_ref())
            .map(|docs| {
                docs.iter()
                    .filter(|doc| {
                        filter.matches(document_region(doc), document_date(collection, doc))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Apply `change` to a copy, persist the copy, then publish it.
    async fn mutate<R, F>(&self, change: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Collections) -> R + Send,
        R: Send,
    {
        let _gate = self.write_gate.lock().await;
        let Some(path) = &self.snapshot_path else {
            return Ok(change(&mut *self.collections.write()));
        };

        let mut next = self.collections.read().clone();
        let out = change(&mut next);
        persist(path, &next).await?;
        *self.collections.write() = next;
        Ok(out)
    }
}

async fn persist(path: &Path, collections: &Collections) -> Result<(), StoreError> {
    let body = serde_json::to_vec(collections)?;
    let io_err = |source: std::io::Error| StoreError::Snapshot {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

fn fields_match(document: &Document, key: &Document) -> bool {
    key.iter().all(|(field, value)| document.get(field) == Some(value))
}

fn remove_matching(collections: &mut Collections, collection: Collection, filter: &Filter) -> u64 {
    let Some(docs) = collections.get_mut(collection.as_ref()) else {
        return 0;
    };
    let before = docs.len();
    docs.retain(|doc| !filter.matches(document_region(doc), document_date(collection, doc)));
    (before - docs.len()) as u64
}

#[async_trait]
impl Datastore for MemoryStore {
    fn find(&self, collection: Collection, query: Query) -> BoxStream<'_, Result<Vec<Document>, StoreError>> {
        let mut docs = self.matching(collection, &query.filter);
        if let Some(order) = query.sort {
            docs.sort_by(|a, b| {
                let ka = (document_date(collection, a), document_region(a));
                let kb = (document_date(collection, b), document_region(b));
                match order {
                    SortOrder::Ascending => ka.cmp(&kb),
                    SortOrder::Descending => kb.cmp(&ka),
                }
            });
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }

        let mut pages = Vec::new();
        let mut docs = docs.into_iter().peekable();
        while docs.peek().is_some() {
            pages.push(Ok(docs.by_ref().take(self.page_size).collect::<Vec<_>>()));
        }
        stream::iter(pages).boxed()
    }

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        if self.matching(collection, filter).is_empty() {
            return Ok(0);
        }
        self.mutate(|collections| remove_matching(collections, collection, filter))
            .await
    }

    async fn insert_many(&self, collection: Collection, documents: Vec<Document>) -> Result<u64, StoreError> {
        let inserted = documents.len() as u64;
        if inserted == 0 {
            return Ok(0);
        }
        self.mutate(|collections| {
            collections
                .entry(collection.to_string())
                .or_default()
                .extend(documents);
        })
        .await?;
        Ok(inserted)
    }

    async fn bulk_upsert(&self, collection: Collection, upserts: Vec<Upsert>) -> Result<u64, StoreError> {
        let written = upserts.len() as u64;
        if written == 0 {
            return Ok(0);
        }
        self.mutate(|collections| {
            let docs = collections.entry(collection.to_string()).or_default();
            for Upsert { key, document } in upserts {
                match docs.iter_mut().find(|doc| fields_match(doc, &key)) {
                    Some(existing) => *existing = document,
                    None => docs.push(document),
                }
            }
        })
        .await?;
        Ok(written)
    }

    async fn replace(&self, replacements: Vec<Replacement>) -> Result<Vec<LoadReport>, StoreError> {
        self.mutate(|collections| {
            replacements
                .into_iter()
                .map(|Replacement { collection, filter, documents }| {
                    let deleted = remove_matching(collections, collection, &filter);
                    let inserted = documents.len() as u64;
                    if inserted > 0 {
                        collections
                            .entry(collection.to_string())
                            .or_default()
                            .extend(documents);
                    }
                    LoadReport { deleted, inserted }
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{find_all, to_document};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        region_id: String,
        date: DateTime<Utc>,
        value: f64,
    }

    fn row(region: &str, d: u32, value: f64) -> Document {
        to_document(&Row {
            region_id: region.into(),
            date: Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap(),
            value,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_find_sorted_limited_and_paged() {
        let store = MemoryStore::new(2);
        let docs = (1..=5).map(|d| row("A", d, d as f64)).collect();
        store.insert_many(Collection::RegionFeatureStore, docs).await.unwrap();

        let mut pages = store.find(
            Collection::RegionFeatureStore,
            Query::new(Filter::all()).sorted(SortOrder::Descending).limit(3),
        );
        let first = pages.next().await.unwrap().unwrap();
        let second = pages.next().await.unwrap().unwrap();
        assert!(pages.next().await.is_none());
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0]["value"], 5.0);
        assert_eq!(second[0]["value"], 3.0);
    }

    #[tokio::test]
    async fn test_delete_day_partition_only() {
        let store = MemoryStore::default();
        store
            .insert_many(
                Collection::DailyRegionGroundwater,
                vec![row("A", 1, 1.0), row("B", 1, 2.0), row("A", 2, 3.0)],
            )
            .await
            .unwrap();
        let day = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let removed = store
            .delete_many(Collection::DailyRegionGroundwater, &Filter::all().day(day))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        let left: Vec<Row> = find_all(&store, Collection::DailyRegionGroundwater, Query::default())
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].value, 3.0);
    }

    #[tokio::test]
    async fn test_bulk_upsert_replaces_by_key() {
        let store = MemoryStore::default();
        let key = |id: &str| {
            let mut key = Document::new();
            key.insert("region_id".into(), id.into());
            key
        };
        let mut doc = Document::new();
        doc.insert("region_id".into(), "A".into());
        doc.insert("soil_type".into(), "clay".into());
        store
            .bulk_upsert(Collection::Regions, vec![Upsert { key: key("A"), document: doc.clone() }])
            .await
            .unwrap();
        doc.insert("soil_type".into(), "rock".into());
        store
            .bulk_upsert(Collection::Regions, vec![Upsert { key: key("A"), document: doc }])
            .await
            .unwrap();
        assert_eq!(store.count(Collection::Regions, &Filter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = MemoryStore::open(&path, 100).unwrap();
            store
                .insert_many(Collection::DailyForecasts, vec![row("A", 1, 9.0)])
                .await
                .unwrap();
        }
        let reopened = MemoryStore::open(&path, 100).unwrap();
        assert_eq!(reopened.count(Collection::DailyForecasts, &Filter::all()).await.unwrap(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_replace_applies_every_partition() {
        let store = MemoryStore::default();
        store
            .insert_many(Collection::DailyRegionGroundwater, vec![row("A", 1, 1.0), row("A", 2, 2.0)])
            .await
            .unwrap();
        let day = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

        let reports = store
            .replace(vec![
                Replacement::new(
                    Collection::DailyRegionGroundwater,
                    Filter::all().between(day, day + Duration::days(1)),
                    vec![row("A", 1, 10.0), row("B", 1, 20.0)],
                ),
                Replacement::new(Collection::DailyRegionRainfall, Filter::all().day(day), vec![row("A", 1, 4.0)]),
            ])
            .await
            .unwrap();
        assert_eq!(
            reports,
            vec![LoadReport { deleted: 1, inserted: 2 }, LoadReport { deleted: 0, inserted: 1 }]
        );
        assert_eq!(store.count(Collection::DailyRegionGroundwater, &Filter::all()).await.unwrap(), 3);
        assert_eq!(store.count(Collection::DailyRegionRainfall, &Filter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_snapshot_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = MemoryStore::open(&path, 100).unwrap();
        store
            .insert_many(Collection::DailyForecasts, vec![row("A", 1, 9.0)])
            .await
            .unwrap();
        // the temp file can no longer be written
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let day = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let result = store
            .replace(vec![Replacement::new(Collection::DailyForecasts, Filter::all().day(day), Vec::new())])
            .await;
        assert!(matches!(result, Err(StoreError::Snapshot { .. })));

        let left: Vec<Row> = find_all(&store, Collection::DailyForecasts, Query::default()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].value, 9.0);
        let reopened = MemoryStore::open(&path, 100).unwrap();
        assert_eq!(reopened.count(Collection::DailyForecasts, &Filter::all()).await.unwrap(), 1);
    }
}
