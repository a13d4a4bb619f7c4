//! Book catalog search
//!
//! Defines the search result model, the [`Catalog`] seam over the remote
//! service, and [`CatalogService`], which adds the single flood-wait retry
//! and the short-lived result cache used between a search and a button press.

mod cache;
/// Scraping client for Library Genesis mirrors.
pub mod libgen;

pub use cache::{QueryRegistry, SearchCache};
pub use libgen::LibgenCatalog;

use crate::config::FLOOD_WAIT_PADDING_SECS;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while querying the catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog asked us to slow down
    #[error("Rate limited by catalog (wait: {}s)", .wait.as_secs())]
    RateLimited {
        /// Wait hinted by the catalog (`Retry-After`), zero when absent
        wait: Duration,
    },
    /// Connectivity problem talking to the catalog
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The catalog answered with an unexpected status
    #[error("Catalog returned HTTP {0}")]
    Status(reqwest::StatusCode),
    /// The response could not be understood
    #[error("Parse error: {0}")]
    Parse(String),
}

impl CatalogError {
    /// Short text that is safe to show to a chat user
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "The library is busy right now, please try again in a minute.",
            Self::Network(_) | Self::Status(_) => "The library could not be reached, please try again later.",
            Self::Parse(_) => "The library returned an unexpected answer, please try again later.",
        }
    }
}

/// A single catalog entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    /// Catalog identifier
    pub id: String,
    /// Book title
    pub title: String,
    /// Author(s) as displayed by the catalog
    pub author: String,
    /// Publisher
    pub publisher: String,
    /// Publication year
    pub year: String,
    /// Language
    pub language: String,
    /// Page count as displayed
    pub pages: String,
    /// Human readable size, e.g. `2 MB`
    pub size: String,
    /// File type, e.g. `epub`
    pub extension: String,
    /// MD5 of the file, used to resolve download links
    pub md5: Option<String>,
    /// Mirror pages listed for the entry
    pub mirrors: Vec<String>,
    /// URL the file bytes can be streamed from, when already known
    pub direct_download_link: Option<String>,
}

/// Remote catalog that can be searched by title
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Search by title; an empty vec means nothing matched
    async fn search_title(&self, query: &str) -> Result<Vec<SearchResult>, CatalogError>;

    /// Resolve the URL the entry's bytes can be streamed from.
    ///
    /// `Ok(None)` means the entry has no direct download.
    async fn resolve_direct_link(
        &self,
        result: &SearchResult,
    ) -> Result<Option<String>, CatalogError> {
        Ok(result.direct_download_link.clone())
    }
}

/// Catalog access used by the bot handlers
pub struct CatalogService {
    catalog: Arc<dyn Catalog>,
    cache: SearchCache,
}

impl CatalogService {
    /// Wrap a catalog with the given result cache
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>, cache: SearchCache) -> Self {
        Self { catalog, cache }
    }

    /// Search the catalog, waiting out one rate-limit signal.
    ///
    /// # Errors
    ///
    /// Returns the catalog error on a second rate limit or any other failure.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, CatalogError> {
        match self.catalog.search_title(query).await {
            Err(CatalogError::RateLimited { wait }) => {
                let pause = wait + Duration::from_secs(FLOOD_WAIT_PADDING_SECS);
                warn!(
                    query = %query,
                    wait_secs = pause.as_secs(),
                    "Catalog rate limit hit, retrying once"
                );
                tokio::time::sleep(pause).await;
                self.catalog.search_title(query).await
            }
            other => other,
        }
    }

    /// Search on behalf of a user and remember the results for their buttons.
    ///
    /// # Errors
    ///
    /// See [`CatalogService::search`].
    pub async fn search_for_user(
        &self,
        user_id: i64,
        query: &str,
    ) -> Result<Arc<Vec<SearchResult>>, CatalogError> {
        let results = Arc::new(self.search(query).await?);
        info!(
            user_id = user_id,
            query = %query,
            count = results.len(),
            "Catalog search finished"
        );
        self.cache.insert(user_id, query, results.clone()).await;
        Ok(results)
    }

    /// Results for a button press: cached when still fresh, searched again otherwise.
    ///
    /// # Errors
    ///
    /// See [`CatalogService::search`].
    pub async fn lookup(
        &self,
        user_id: i64,
        query: &str,
    ) -> Result<Arc<Vec<SearchResult>>, CatalogError> {
        if let Some(results) = self.cache.get(user_id, query).await {
            debug!(user_id = user_id, query = %query, "Search cache hit");
            return Ok(results);
        }
        debug!(user_id = user_id, query = %query, "Search cache miss, searching again");
        self.search_for_user(user_id, query).await
    }

    /// Resolve the direct link of a chosen entry.
    ///
    /// # Errors
    ///
    /// Returns the catalog error if the mirror page cannot be fetched.
    pub async fn resolve_direct_link(
        &self,
        result: &SearchResult,
    ) -> Result<Option<String>, CatalogError> {
        self.catalog.resolve_direct_link(result).await
    }
}
