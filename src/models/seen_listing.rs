use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::listing::SourceId;

/// A dedup record: the first time a `(source, external_id)` key was notified.
/// Rows are insert-only.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SeenListing {
    pub source: String,
    pub external_id: String,
    pub first_seen_at: DateTime<Utc>,
}

impl SeenListing {
    pub async fn exists(
        pool: &SqlitePool,
        source: SourceId,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM seen_listings WHERE source = ?1 AND external_id = ?2",
        )
        .bind(source.as_str())
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.is_some())
    }

    /// Record a key. An existing row is left untouched so `first_seen_at` never moves.
    pub async fn insert(
        pool: &SqlitePool,
        source: SourceId,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO seen_listings (source, external_id, first_seen_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (source, external_id) DO NOTHING",
        )
        .bind(source.as_str())
        .bind(external_id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(
        pool: &SqlitePool,
        source: SourceId,
        external_id: &str,
    ) -> Result<Option<SeenListing>, StoreError> {
        let row = sqlx::query_as::<_, SeenListing>(
            "SELECT source, external_id, first_seen_at FROM seen_listings WHERE source = ?1 AND external_id = ?2",
        )
        .bind(source.as_str())
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Most recently recorded keys, optionally for a single source.
    pub async fn recent(
        pool: &SqlitePool,
        source: Option<SourceId>,
        limit: i64,
    ) -> Result<Vec<SeenListing>, StoreError> {
        let rows = sqlx::query_as::<_, SeenListing>(
            "SELECT source, external_id, first_seen_at FROM seen_listings
             WHERE (?1 IS NULL OR source = ?1)
             ORDER BY first_seen_at DESC LIMIT ?2",
        )
        .bind(source.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(pool: &SqlitePool, source: Option<SourceId>) -> Result<i64, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM seen_listings WHERE (?1 IS NULL OR source = ?1)")
                .bind(source.map(|s| s.as_str()))
                .fetch_one(pool)
                .await?;
        Ok(row.0)
    }
}
