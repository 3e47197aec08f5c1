//! Fetch-or-cache orchestration for documentation sections.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::config::DocsConfig;
use crate::docs_parser::parse_section;
use crate::error::{BoxError, DocumentationError, ErrorContext};
use crate::fetcher::{FetchError, HttpClient, build_url};
use crate::search::SearchEngine;
use crate::section::Section;

/// Resolves section paths against the documentation source, keeping the cache
/// and the search index in step with every successful fetch.
#[derive(Clone)]
pub struct DocumentationManager {
    client: Arc<dyn HttpClient>,
    cache: Arc<dyn Cache>,
    search: Arc<SearchEngine>,
    // Placeholders for configured sections, searchable until the page is fetched.
    configured: Arc<BTreeMap<String, Section>>,
    base_url: String,
    cache_ttl: Duration,
    request_timeout: Duration,
}

impl DocumentationManager {
    pub fn new(
        config: &DocsConfig,
        client: Arc<dyn HttpClient>,
        cache: Arc<dyn Cache>,
        search: Arc<SearchEngine>,
    ) -> Self {
        let configured = config
            .sections
            .iter()
            .map(|entry| (entry.path.clone(), entry.to_section()))
            .collect();
        Self {
            client,
            cache,
            search,
            configured: Arc::new(configured),
            base_url: config.base_url.clone(),
            cache_ttl: config.cache_ttl,
            request_timeout: config.request_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn search_engine(&self) -> &Arc<SearchEngine> {
        &self.search
    }

    /// Returns the section at `path`, fetching and parsing it on a cache miss.
    ///
    /// Concurrent callers for the same path share a single fetch. On failure the
    /// cache and the index are left untouched.
    pub async fn fetch_section(&self, path: &str) -> Result<Section, DocumentationError> {
        if let Some(section) = self.cache.get(path).await {
            tracing::info!("Cache hit for {}", path);
            return Ok(section);
        }

        ErrorContext::new(format!("fetch_section:{path}"))
            .handle(self.fetch_locked(path))
            .await
    }

    async fn fetch_locked(&self, path: &str) -> Result<Section, BoxError> {
        let _lock = self.cache.lock(path).await;

        // Another caller may have filled the entry while we waited.
        if let Some(section) = self.cache.get(path).await {
            tracing::info!("Cache filled while waiting for {}", path);
            return Ok(section);
        }

        tracing::info!("Cache miss for {}. Fetching...", path);
        let url = build_url(&self.base_url, path)?;
        let html = tokio::time::timeout(self.request_timeout, self.client.get(&url))
            .await
            .map_err(|_| FetchError::Timeout(self.request_timeout))??;

        let section = parse_section(path, &html)?;
        let evicted = self.cache.set(path, section.clone(), self.cache_ttl).await?;
        self.search.index_section(&section).await;
        if let Some(victim) = evicted {
            self.unindex(&victim).await;
        }
        tracing::info!(
            "Fetched {} ({} subsections)",
            path,
            section.subsections.len()
        );
        Ok(section)
    }

    /// Rebuilds the search index from the configured sections and every fresh
    /// cached page, cached content taking precedence. Returns the number of pages indexed.
    pub async fn rebuild_index(&self) -> usize {
        self.search.clear().await;
        for section in self.configured.values() {
            self.search.index_section(section).await;
        }
        let cached = self.cache.sections().await;
        for section in &cached {
            self.search.index_section(section).await;
        }
        let pages = self.configured.len()
            + cached
                .iter()
                .filter(|s| !self.configured.contains_key(&s.path))
                .count();
        tracing::info!("Indexed {} pages ({} from cache)", pages, cached.len());
        pages
    }

    /// Drops `path` (or everything when `None`) from the cache and the index.
    pub async fn invalidate(&self, path: Option<&str>) {
        match path {
            Some(path) => {
                self.cache.remove(path).await;
                self.unindex(path).await;
                tracing::info!("Invalidated {}", path);
            }
            None => {
                self.cache.clear().await;
                self.rebuild_index().await;
                tracing::info!("Document cache cleared.");
            }
        }
    }

    // A page leaving the cache falls back to its configured placeholder, if any.
    async fn unindex(&self, path: &str) {
        match self.configured.get(path) {
            Some(placeholder) => self.search.index_section(placeholder).await,
            None => self.search.remove(path).await,
        }
    }
}
