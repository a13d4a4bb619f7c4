//! Short-lived memory for search results and long queries.

use super::SearchResult;
use crate::config::{QUERY_REGISTRY_MAX_SIZE, QUERY_REGISTRY_TTL_SECS, SEARCH_CACHE_MAX_SIZE};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

/// Results of recent searches keyed by `(user_id, query)`
#[derive(Clone)]
pub struct SearchCache {
    cache: Cache<(i64, String), Arc<Vec<SearchResult>>>,
}

impl SearchCache {
    /// Creates a cache whose entries expire after `ttl`
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Cache with the default capacity
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(ttl, SEARCH_CACHE_MAX_SIZE)
    }

    /// Remember the results a user was shown
    pub async fn insert(&self, user_id: i64, query: &str, results: Arc<Vec<SearchResult>>) {
        self.cache.insert((user_id, query.to_string()), results).await;
    }

    /// Results shown to the user for this query, if still fresh
    pub async fn get(&self, user_id: i64, query: &str) -> Option<Arc<Vec<SearchResult>>> {
        self.cache.get(&(user_id, query.to_string())).await
    }
}

/// Registry of queries too long to travel inside callback data.
///
/// Queries are stored under a 16 hex character SHA-256 prefix.
#[derive(Clone)]
pub struct QueryRegistry {
    cache: Cache<String, String>,
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(QUERY_REGISTRY_TTL_SECS),
            QUERY_REGISTRY_MAX_SIZE,
        )
    }
}

impl QueryRegistry {
    /// Creates a registry whose entries expire after `ttl`
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Stable short key for a query
    #[must_use]
    pub fn key_for(query: &str) -> String {
        let digest = Sha256::digest(query.as_bytes());
        digest.iter().take(8).fold(String::with_capacity(16), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
    }

    /// Register a query and return its key
    pub async fn register(&self, query: &str) -> String {
        let key = Self::key_for(query);
        self.cache.insert(key.clone(), query.to_string()).await;
        key
    }

    /// Query registered under `key`, if it has not expired
    pub async fn resolve(&self, key: &str) -> Option<String> {
        self.cache.get(key).await
    }
}
