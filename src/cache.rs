use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::{DataSource, Query};
use crate::error::Result;
use crate::models::Dataset;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    sql: String,
    params: Vec<String>,
}

impl CacheKey {
    fn of(query: &Query) -> Self {
        Self {
            sql: query.sql.clone(),
            params: query.params(),
        }
    }
}

struct CachedDataset {
    dataset: Arc<Dataset>,
    fetched_at: Instant,
}

/// Memoizes raw query results keyed by (query text, parameters).
///
/// Entries live until invalidated, or until `ttl` elapses when one is set.
/// Failed fetches are never stored.
pub struct QueryCache<S> {
    source: S,
    ttl: Option<Duration>,
    entries: HashMap<CacheKey, CachedDataset>,
}

impl<S: DataSource> QueryCache<S> {
    pub fn new(source: S, ttl: Option<Duration>) -> Self {
        Self {
            source,
            ttl,
            entries: HashMap::new(),
        }
    }

    pub async fn fetch(&mut self, query: &Query) -> Result<Arc<Dataset>> {
        let key = CacheKey::of(query);
        if let Some(entry) = self.entries.get(&key) {
            if self.is_fresh(entry) {
                tracing::debug!(query = query.name, "query cache hit");
                return Ok(Arc::clone(&entry.dataset));
            }
            tracing::debug!(query = query.name, "query cache entry expired");
        }

        let dataset = Arc::new(self.source.fetch(query).await?);
        self.entries.insert(
            key,
            CachedDataset {
                dataset: Arc::clone(&dataset),
                fetched_at: Instant::now(),
            },
        );
        Ok(dataset)
    }

    /// Drops the entry for `query`; returns whether one existed.
    pub fn invalidate(&mut self, query: &Query) -> bool {
        self.entries.remove(&CacheKey::of(query)).is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_fresh(&self, entry: &CachedDataset) -> bool {
        match self.ttl {
            Some(ttl) => entry.fetched_at.elapsed() < ttl,
            None => true,
        }
    }
}
