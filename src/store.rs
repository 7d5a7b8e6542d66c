use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use deadpool_postgres::{Config as PgConfig, Object, Pool, Runtime};
use tokio_postgres::{NoTls, Row};
use tracing::warn;

use crate::error::StoreError;
use crate::types::{ArticleRecord, ArticleStatus, CanonicalUrl};

/// Deadline for any single pool checkout or query. Storage calls must never
/// hang a request indefinitely.
const STORE_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Persistence seam for the pipeline. One stored record per canonical URL.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn find(&self, key: &CanonicalUrl) -> Result<Option<ArticleRecord>, StoreError>;

    /// Atomic insert-or-replace keyed by canonical URL. Returns the row as
    /// stored, so concurrent writers all answer with a persisted state.
    async fn upsert(&self, record: &ArticleRecord) -> Result<ArticleRecord, StoreError>;

    /// Most recently fetched first.
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<ArticleRecord>, StoreError>;

    /// Attach a generated summary to an existing record.
    async fn set_summary(
        &self,
        key: &CanonicalUrl,
        summary: &str,
        model: &str,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub async fn connect(pg_url: &str) -> Result<Self> {
        let mut cfg = PgConfig::new();
        cfg.url = Some(pg_url.to_string());

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
        let store = Self { pool };
        store.ensure_table().await?;
        Ok(store)
    }

    // Safe to run on every boot
    async fn ensure_table(&self) -> Result<()> {
        const SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS public.articles (
          id            bigserial PRIMARY KEY,
          canonical_url text NOT NULL,
          original_url  text NOT NULL,
          title         text,
          authors       text[] NOT NULL DEFAULT '{}',
          publish_date  timestamptz,
          text          text NOT NULL DEFAULT '',
          top_image_url text,
          status        text NOT NULL,
          error_reason  text,
          summary       text,
          summary_model text,
          fetched_at    timestamptz NOT NULL,
          created_at    timestamptz NOT NULL DEFAULT now()
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_articles_canonical_url ON public.articles (canonical_url);
        CREATE INDEX IF NOT EXISTS idx_articles_fetched_at ON public.articles (fetched_at DESC);
        "#;

        let conn = self.client().await?;
        conn.batch_execute(SQL).await?;
        Ok(())
    }

    async fn client(&self) -> Result<Object, StoreError> {
        match tokio::time::timeout(STORE_OP_TIMEOUT, self.pool.get()).await {
            Ok(got) => got.map_err(|e| StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Unavailable(
                "connection pool wait timed out".into(),
            )),
        }
    }
}

/// Run one query under the storage deadline.
async fn bounded<T>(
    fut: impl Future<Output = Result<T, tokio_postgres::Error>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(STORE_OP_TIMEOUT, fut).await {
        Ok(res) => res.map_err(classify),
        Err(_) => Err(StoreError::Unavailable("storage operation timed out".into())),
    }
}

/// Key collisions are the only constraint in the schema and the upsert
/// handles those; anything in SQLSTATE class 23 that still escapes is a bug
/// worth distinguishing from an outage.
fn classify(e: tokio_postgres::Error) -> StoreError {
    match e.code() {
        Some(code) if code.code().starts_with("23") => StoreError::Constraint(e.to_string()),
        _ => StoreError::Unavailable(e.to_string()),
    }
}

fn record_from_row(row: &Row) -> ArticleRecord {
    let status: String = row.get("status");
    ArticleRecord {
        canonical_url: row.get("canonical_url"),
        original_url: row.get("original_url"),
        title: row.get("title"),
        authors: row.get("authors"),
        publish_date: row.get("publish_date"),
        text: row.get("text"),
        top_image_url: row.get("top_image_url"),
        status: status.parse().unwrap_or(ArticleStatus::Failed),
        error_reason: row.get("error_reason"),
        summary: row.get("summary"),
        summary_model: row.get("summary_model"),
        fetched_at: row.get("fetched_at"),
    }
}

#[async_trait]
impl ArticleStore for PgStore {
    async fn find(&self, key: &CanonicalUrl) -> Result<Option<ArticleRecord>, StoreError> {
        const SQL: &str = r#"
        SELECT canonical_url, original_url, title, authors, publish_date, text,
               top_image_url, status, error_reason, summary, summary_model, fetched_at
        FROM public.articles
        WHERE canonical_url = $1
        "#;

        let key = key.as_str();
        let conn = self.client().await?;
        let row = bounded(conn.query_opt(SQL, &[&key])).await?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn upsert(&self, record: &ArticleRecord) -> Result<ArticleRecord, StoreError> {
        const SQL: &str = r#"
        INSERT INTO public.articles
          (canonical_url, original_url, title, authors, publish_date, text,
           top_image_url, status, error_reason, summary, summary_model, fetched_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (canonical_url) DO UPDATE
          SET original_url  = EXCLUDED.original_url,
              title         = EXCLUDED.title,
              authors       = EXCLUDED.authors,
              publish_date  = EXCLUDED.publish_date,
              text          = EXCLUDED.text,
              top_image_url = EXCLUDED.top_image_url,
              status        = EXCLUDED.status,
              error_reason  = EXCLUDED.error_reason,
              summary       = EXCLUDED.summary,
              summary_model = EXCLUDED.summary_model,
              fetched_at    = EXCLUDED.fetched_at
        RETURNING canonical_url, original_url, title, authors, publish_date, text,
                  top_image_url, status, error_reason, summary, summary_model, fetched_at
        "#;

        let status = record.status.as_str();
        let conn = self.client().await?;
        let row = bounded(conn.query_one(
            SQL,
            &[
                &record.canonical_url,
                &record.original_url,
                &record.title,
                &record.authors,
                &record.publish_date,
                &record.text,
                &record.top_image_url,
                &status,
                &record.error_reason,
                &record.summary,
                &record.summary_model,
                &record.fetched_at,
            ],
        ))
        .await?;
        Ok(record_from_row(&row))
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<ArticleRecord>, StoreError> {
        const SQL: &str = r#"
        SELECT canonical_url, original_url, title, authors, publish_date, text,
               top_image_url, status, error_reason, summary, summary_model, fetched_at
        FROM public.articles
        ORDER BY fetched_at DESC
        OFFSET $1 LIMIT $2
        "#;

        let conn = self.client().await?;
        let rows = bounded(conn.query(SQL, &[&offset, &limit])).await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn set_summary(
        &self,
        key: &CanonicalUrl,
        summary: &str,
        model: &str,
    ) -> Result<(), StoreError> {
        const SQL: &str =
            "UPDATE public.articles SET summary = $2, summary_model = $3 WHERE canonical_url = $1";

        let key = key.as_str();
        let conn = self.client().await?;
        let n = bounded(conn.execute(SQL, &[&key, &summary, &model])).await?;
        if n == 0 {
            warn!(url = %key, "summary written for a record that no longer exists");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory ArticleStore with the same upsert semantics as PgStore.
    #[derive(Default)]
    pub struct MemStore {
        rows: Mutex<HashMap<String, ArticleRecord>>,
    }

    impl MemStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ArticleStore for MemStore {
        async fn find(&self, key: &CanonicalUrl) -> Result<Option<ArticleRecord>, StoreError> {
            Ok(self.rows.lock().unwrap().get(key.as_str()).cloned())
        }

        async fn upsert(&self, record: &ArticleRecord) -> Result<ArticleRecord, StoreError> {
            self.rows
                .lock()
                .unwrap()
                .insert(record.canonical_url.clone(), record.clone());
            Ok(record.clone())
        }

        async fn list(&self, offset: i64, limit: i64) -> Result<Vec<ArticleRecord>, StoreError> {
            let mut rows: Vec<ArticleRecord> =
                self.rows.lock().unwrap().values().cloned().collect();
            rows.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));
            Ok(rows
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect())
        }

        async fn set_summary(
            &self,
            key: &CanonicalUrl,
            summary: &str,
            model: &str,
        ) -> Result<(), StoreError> {
            if let Some(rec) = self.rows.lock().unwrap().get_mut(key.as_str()) {
                rec.summary = Some(summary.to_string());
                rec.summary_model = Some(model.to_string());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn mem_store_upsert_replaces_by_key() {
        use crate::types::canonicalize;
        use chrono::Utc;

        let store = MemStore::new();
        let (url, key) = canonicalize("http://example.com/a").unwrap();

        let first = ArticleRecord::failure(&key, &url, "http status 500".into(), Utc::now());
        store.upsert(&first).await.unwrap();

        let mut second = first.clone();
        second.status = ArticleStatus::Ok;
        second.error_reason = None;
        second.text = "recovered".into();
        store.upsert(&second).await.unwrap();

        assert_eq!(store.row_count(), 1);
        let found = store.find(&key).await.unwrap().unwrap();
        assert_eq!(found.status, ArticleStatus::Ok);
        assert!(found.error_reason.is_none());
    }

    #[tokio::test]
    async fn mem_store_lists_newest_first() {
        use crate::types::canonicalize;
        use chrono::{Duration, Utc};

        let store = MemStore::new();
        let now = Utc::now();
        for (i, raw) in [
            "http://example.com/1",
            "http://example.com/2",
            "http://example.com/3",
        ]
        .iter()
        .enumerate()
        {
            let (url, key) = canonicalize(raw).unwrap();
            let mut rec = ArticleRecord::failure(&key, &url, "x".into(), now);
            rec.fetched_at = now + Duration::seconds(i as i64);
            store.upsert(&rec).await.unwrap();
        }

        let page = store.list(0, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].canonical_url, "http://example.com/3");
        assert_eq!(page[1].canonical_url, "http://example.com/2");

        let rest = store.list(2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].canonical_url, "http://example.com/1");
    }
}
