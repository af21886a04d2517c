use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db;
use crate::error::StoreError;
use crate::models::listing::{Listing, SourceId};
use crate::models::seen_listing::SeenListing;

/// Remembers which listing keys have already been notified.
///
/// All mutation goes through `mark_seen`. Implementations must tolerate
/// concurrent calls from every runner.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn has_seen(&self, source: SourceId, external_id: &str) -> Result<bool, StoreError>;

    /// Whether any key of `source` has ever been recorded.
    async fn has_any(&self, source: SourceId) -> Result<bool, StoreError>;

    /// Record a key. Marking an already-seen key is a no-op.
    async fn mark_seen(
        &self,
        source: SourceId,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Keep only listings whose key has never been marked, in input order.
    /// A key repeated within `listings` survives once (first occurrence).
    /// Nothing is marked here; callers mark after a successful dispatch.
    async fn filter_new(&self, listings: Vec<Listing>) -> Result<Vec<Listing>, StoreError> {
        let mut batch: HashSet<(SourceId, String)> = HashSet::with_capacity(listings.len());
        let mut fresh = Vec::new();
        for listing in listings {
            if !batch.insert((listing.source_id, listing.external_id.clone())) {
                continue;
            }
            if !self.has_seen(listing.source_id, &listing.external_id).await? {
                fresh.push(listing);
            }
        }
        Ok(fresh)
    }
}

/// Durable store backed by the SQLite state database.
#[derive(Debug, Clone)]
pub struct SqliteDedupStore {
    pool: SqlitePool,
}

impl SqliteDedupStore {
    /// Open the database at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = db::create_pool(path).await?;
        db::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn has_seen(&self, source: SourceId, external_id: &str) -> Result<bool, StoreError> {
        SeenListing::exists(&self.pool, source, external_id).await
    }

    async fn has_any(&self, source: SourceId) -> Result<bool, StoreError> {
        Ok(SeenListing::count(&self.pool, Some(source)).await? > 0)
    }

    async fn mark_seen(
        &self,
        source: SourceId,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let inserted = SeenListing::insert(&self.pool, source, external_id, at).await?;
        if !inserted {
            tracing::debug!("Key {source}/{external_id} was already recorded");
        }
        Ok(())
    }
}

type SeenMap = HashMap<(SourceId, String), DateTime<Utc>>;

/// Process-local store. Forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    seen: Mutex<SeenMap>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_seen(&self, source: SourceId, external_id: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .ok()?
            .get(&(source, external_id.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, SeenMap>, StoreError> {
        self.seen
            .lock()
            .map_err(|_| StoreError::Corrupt("dedup map poisoned".to_string()))
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn has_seen(&self, source: SourceId, external_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(&(source, external_id.to_string())))
    }

    async fn has_any(&self, source: SourceId) -> Result<bool, StoreError> {
        Ok(self.lock()?.keys().any(|(s, _)| *s == source))
    }

    async fn mark_seen(
        &self,
        source: SourceId,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.lock()?
            .entry((source, external_id.to_string()))
            .or_insert(at);
        Ok(())
    }
}
