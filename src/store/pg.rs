#![cfg(feature = "db")]
//! PostgreSQL datastore
//!
//! Every collection shares one `documents` table. Region and date are lifted
//! out of the JSON body into indexed columns at write time so filters and
//! ordering never have to look inside `body`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{info, warn};

use super::{
    document_date, document_region, Collection, Datastore, Document, Filter, LoadReport, Query,
    Replacement, SortOrder, StoreError, Upsert,
};
use crate::config::StoreConfig;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id          BIGSERIAL PRIMARY KEY,
    collection  TEXT NOT NULL,
    region_id   TEXT,
    doc_date    TIMESTAMPTZ,
    body        JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS documents_collection_date_idx
    ON documents (collection, doc_date, region_id);
"#;

pub struct PgStore {
    pool: PgPool,
    page_size: usize,
}

impl PgStore {
    /// Connect with exponential backoff and ensure the schema exists.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        info!("Initializing datastore connection pool");
        let pool = Self::connect_with_retry(config, 5).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!("Datastore connection pool initialized");
        Ok(Self {
            pool,
            page_size: config.page_size.max(1),
        })
    }

    async fn connect_with_retry(config: &StoreConfig, max_attempts: usize) -> Result<PgPool, StoreError> {
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            attempt += 1;
            let result = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
                .connect(&config.url)
                .await;
            match result {
                Ok(pool) => return Ok(pool),
                Err(e) if attempt >= max_attempts => return Err(e.into()),
                Err(e) => {
                    warn!(
                        "Datastore connection attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn fetch_page(
        &self,
        collection: Collection,
        query: &Query,
        offset: usize,
        size: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT body FROM documents");
        push_where(&mut qb, collection, &query.filter);
        match query.sort {
            Some(SortOrder::Descending) => qb.push(" ORDER BY doc_date DESC, region_id DESC, id DESC"),
            _ => qb.push(" ORDER BY doc_date ASC, region_id ASC, id ASC"),
        };
        qb.push(" LIMIT ").push_bind(size as i64);
        qb.push(" OFFSET ").push_bind(offset as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| match row.try_get::<Value, _>("body")? {
                Value::Object(map) => Ok(map),
                _ => Err(StoreError::NotAnObject),
            })
            .collect()
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, collection: Collection, filter: &Filter) {
    qb.push(" WHERE collection = ").push_bind(collection.to_string());
    if let Some(ids) = &filter.region_ids {
        qb.push(" AND region_id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND doc_date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND doc_date < ").push_bind(to);
    }
    if let Some(dates) = &filter.dates {
        qb.push(" AND doc_date = ANY(").push_bind(dates.clone()).push(")");
    }
}

async fn delete_in(conn: &mut PgConnection, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
    let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM documents");
    push_where(&mut qb, collection, filter);
    Ok(qb.build().execute(conn).await?.rows_affected())
}

async fn insert_in(conn: &mut PgConnection, collection: Collection, documents: &[Document]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    // Stay well below the bind parameter limit.
    for chunk in documents.chunks(1000) {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO documents (collection, region_id, doc_date, body) ",
        );
        qb.push_values(chunk, |mut b, doc| {
            let date: Option<DateTime<Utc>> = document_date(collection, doc);
            b.push_bind(collection.to_string())
                .push_bind(document_region(doc).map(str::to_string))
                .push_bind(date)
                .push_bind(Value::Object(doc.clone()));
        });
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

struct PageState {
    offset: usize,
    remaining: Option<usize>,
    done: bool,
}

#[async_trait]
impl Datastore for PgStore {
    fn find(&self, collection: Collection, query: Query) -> BoxStream<'_, Result<Vec<Document>, StoreError>> {
        let state = PageState {
            offset: 0,
            remaining: query.limit,
            done: false,
        };
        stream::try_unfold((state, query), move |(mut state, query)| async move {
            if state.done || state.remaining == Some(0) {
                return Ok(None);
            }
            let size = state.remaining.map_or(self.page_size, |r| r.min(self.page_size));
            let page = self.fetch_page(collection, &query, state.offset, size).await?;
            if page.is_empty() {
                return Ok(None);
            }
            state.done = page.len() < size;
            state.offset += page.len();
            state.remaining = state.remaining.map(|r| r - page.len());
            Ok(Some((page, (state, query))))
        })
        .boxed()
    }

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        delete_in(&mut conn, collection, filter).await
    }

    async fn insert_many(&self, collection: Collection, documents: Vec<Document>) -> Result<u64, StoreError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let inserted = insert_in(&mut tx, collection, &documents).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn replace(&self, replacements: Vec<Replacement>) -> Result<Vec<LoadReport>, StoreError> {
        // Dropping the transaction on any error rolls every partition back.
        let mut tx = self.pool.begin().await?;
        let mut reports = Vec::with_capacity(replacements.len());
        for Replacement { collection, filter, documents } in &replacements {
            let deleted = delete_in(&mut tx, *collection, filter).await?;
            let inserted = insert_in(&mut tx, *collection, documents).await?;
            reports.push(LoadReport { deleted, inserted });
        }
        tx.commit().await?;
        Ok(reports)
    }

    async fn bulk_upsert(&self, collection: Collection, upserts: Vec<Upsert>) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for Upsert { key, document } in upserts {
            sqlx::query("DELETE FROM documents WHERE collection = $1 AND body @> $2")
                .bind(collection.to_string())
                .bind(Value::Object(key))
                .execute(&mut *tx)
                .await?;
            let date = document_date(collection, &document);
            let region = document_region(&document).map(str::to_string);
            written += sqlx::query(
                "INSERT INTO documents (collection, region_id, doc_date, body) VALUES ($1, $2, $3, $4)",
            )
            .bind(collection.to_string())
            .bind(region)
            .bind(date)
            .bind(Value::Object(document))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS n FROM documents");
        push_where(&mut qb, collection, filter);
        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        info!("Closing datastore connection pool");
        self.pool.close().await;
    }
}
