//! Durable store of sources and items. Owns the deduplication key
//! (`url_hash`, UNIQUE) and the item lifecycle; both pipeline stages read and
//! write through it, one commit per logical unit of work.

use crate::config::SourceConfig;
use crate::types::{
    DigestError, Item, ItemStatus, NewItem, Result, Source, SourceKind, SummarizedItem, Summary,
};
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        source_url TEXT NOT NULL UNIQUE,
        feed_url TEXT,
        kind TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        last_fetch_at TEXT,
        etag TEXT,
        last_modified TEXT
    )",
    "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY,
        source_id INTEGER NOT NULL REFERENCES sources(id),
        title TEXT NOT NULL,
        url TEXT NOT NULL,
        guid TEXT,
        published_at TEXT,
        fetched_at TEXT NOT NULL,
        content_text TEXT NOT NULL DEFAULT '',
        url_hash TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL DEFAULT 'new',
        summary_json TEXT,
        model_used TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_items_status ON items(status)",
    "CREATE INDEX IF NOT EXISTS idx_items_url_hash ON items(url_hash)",
    "CREATE INDEX IF NOT EXISTS idx_items_published_at ON items(published_at)",
];

/// Deterministic fingerprint of an item's canonical URL; the sole
/// deduplication key.
pub fn url_hash(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn from_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::open_with(options).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open_with(SqliteConnectOptions::from_str("sqlite::memory:")?).await
    }

    async fn open_with(options: SqliteConnectOptions) -> Result<Self> {
        // Single connection: the pipeline is strictly sequential, and this
        // keeps an in-memory database visible across all operations.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Insert-or-update a source by its unique origin URL. Active iff a feed
    /// URL was resolved. Returns the stored row, including cached
    /// conditional-request validators from earlier runs.
    pub async fn upsert_source(
        &self,
        config: &SourceConfig,
        feed_url: Option<&str>,
    ) -> Result<Source> {
        let active = feed_url.is_some();
        sqlx::query(
            "INSERT INTO sources (name, source_url, feed_url, kind, active)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (source_url) DO UPDATE SET
                 name = excluded.name,
                 feed_url = excluded.feed_url,
                 kind = excluded.kind,
                 active = excluded.active",
        )
        .bind(&config.name)
        .bind(&config.url)
        .bind(feed_url)
        .bind(config.kind.as_str())
        .bind(active)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM sources WHERE source_url = ?")
            .bind(&config.url)
            .fetch_one(&self.pool)
            .await?;
        source_from_row(&row)
    }

    /// The deduplication guard. Callers check before insert; the UNIQUE
    /// constraint on `url_hash` remains the authoritative enforcement.
    pub async fn item_exists(&self, url_hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM items WHERE url_hash = ?")
            .bind(url_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Insert a single item with status `new`. Fails on a duplicate
    /// `url_hash`, which is the intended race protection.
    pub async fn insert_item(&self, item: &NewItem) -> Result<i64> {
        let result = insert_item_query(item, to_ts(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Commit one source's ingestion as a single unit of work: refresh the
    /// conditional-request validators and insert all newly discovered items.
    /// A crash mid-source loses only this source's batch.
    pub async fn commit_source_ingest(
        &self,
        source_id: i64,
        etag: Option<&str>,
        last_modified: Option<&str>,
        fetched_at: DateTime<Utc>,
        items: &[NewItem],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE sources SET etag = ?, last_modified = ?, last_fetch_at = ? WHERE id = ?")
            .bind(etag)
            .bind(last_modified)
            .bind(to_ts(fetched_at))
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        let fetched = to_ts(fetched_at);
        for item in items {
            insert_item_query(item, fetched.clone())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!("Committed {} new items for source {}", items.len(), source_id);
        Ok(items.len())
    }

    /// Items eligible for summarization: status `new`, published on/after the
    /// cutoff or with no publish date, newest-published first. SQLite sorts
    /// NULLs last under DESC, so undated items follow dated ones.
    pub async fn eligible_for_summary(
        &self,
        limit: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            "SELECT * FROM items
             WHERE status = 'new' AND (published_at >= ? OR published_at IS NULL)
             ORDER BY published_at DESC
             LIMIT ?",
        )
        .bind(to_ts(cutoff))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// One-time backward-compatibility sweep: bulk-skip items published
    /// before the cutoff. Returns the number of rows transitioned.
    pub async fn skip_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE items SET status = 'skipped'
             WHERE status = 'new' AND published_at IS NOT NULL AND published_at < ?",
        )
        .bind(to_ts(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Transition an item out of `new`. Status moves are monotonic: the WHERE
    /// clause refuses to touch items already in a terminal state, and each
    /// transition is its own commit.
    pub async fn transition(
        &self,
        item_id: i64,
        status: ItemStatus,
        summary: Option<&Summary>,
        model_used: Option<&str>,
    ) -> Result<()> {
        let summary_json = summary.map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            "UPDATE items SET status = ?, summary_json = ?, model_used = ?
             WHERE id = ? AND status = 'new'",
        )
        .bind(status.as_str())
        .bind(summary_json)
        .bind(model_used)
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DigestError::NotNew { item_id });
        }
        info!("Item {} -> {}", item_id, status.as_str());
        Ok(())
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Item> {
        let row = sqlx::query("SELECT * FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await?;
        item_from_row(&row)
    }

    pub async fn count_by_status(&self, status: ItemStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Read contract for the downstream site renderer: summarized items with
    /// their source names, newest published first.
    pub async fn summarized_items(&self, limit: i64) -> Result<Vec<SummarizedItem>> {
        let rows = sqlx::query(
            "SELECT i.title, i.url, i.published_at, i.summary_json, i.model_used, s.name AS source_name
             FROM items i JOIN sources s ON s.id = i.source_id
             WHERE i.status = 'summarized'
             ORDER BY i.published_at DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let summary_json: String = row.try_get("summary_json")?;
            out.push(SummarizedItem {
                title: row.try_get("title")?,
                url: row.try_get("url")?,
                source_name: row.try_get("source_name")?,
                published_at: opt_ts(row, "published_at")?,
                summary: serde_json::from_str(&summary_json)?,
                model_used: row.try_get("model_used")?,
            });
        }
        Ok(out)
    }
}

fn insert_item_query<'q>(
    item: &'q NewItem,
    fetched_at: String,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    sqlx::query(
        "INSERT INTO items
             (source_id, title, url, guid, published_at, fetched_at, content_text, url_hash, status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'new')",
    )
    .bind(item.source_id)
    .bind(&item.title)
    .bind(&item.url)
    .bind(&item.guid)
    .bind(item.published_at.map(to_ts))
    .bind(fetched_at)
    .bind(&item.content_text)
    .bind(&item.url_hash)
}

fn opt_ts(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.as_deref().map(from_ts).transpose()
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let kind: String = row.try_get("kind")?;
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        source_url: row.try_get("source_url")?,
        feed_url: row.try_get("feed_url")?,
        kind: SourceKind::parse(&kind),
        active: row.try_get("active")?,
        last_fetch_at: opt_ts(row, "last_fetch_at")?,
        etag: row.try_get("etag")?,
        last_modified: row.try_get("last_modified")?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let status: String = row.try_get("status")?;
    let fetched_at: String = row.try_get("fetched_at")?;
    let summary_json: Option<String> = row.try_get("summary_json")?;
    Ok(Item {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        guid: row.try_get("guid")?,
        published_at: opt_ts(row, "published_at")?,
        fetched_at: from_ts(&fetched_at)?,
        content_text: row.try_get("content_text")?,
        url_hash: row.try_get("url_hash")?,
        status: ItemStatus::parse(&status)
            .ok_or_else(|| DigestError::Config(format!("unknown item status '{status}'")))?,
        summary: summary_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        model_used: row.try_get("model_used")?,
    })
}
