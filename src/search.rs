//! Inverted index over parsed sections with field-weighted relevance.
//!
//! Every section (including each subsection, under its `#fragment` path) is
//! indexed as its own document. Scoring sums, over distinct query terms,
//! `tf(term, field) * weight(field)` where `tf = 1 + ln(count)`.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{CoreError, DocumentationError, ErrorContext};
use crate::section::Section;

pub const TITLE_WEIGHT: f64 = 10.0;
pub const BODY_WEIGHT: f64 = 1.0;

/// Words of context kept on each side of the first match in a snippet.
const SNIPPET_WORDS_BEFORE: usize = 10;
const SNIPPET_WORDS_AFTER: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Body,
}

impl Field {
    fn weight(self) -> f64 {
        match self {
            Field::Title => TITLE_WEIGHT,
            Field::Body => BODY_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Posting {
    path: String,
    field: Field,
    term_frequency: u32,
}

#[derive(Debug, Clone)]
struct IndexedDoc {
    title: String,
    content: String,
    terms: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct IndexState {
    docs: HashMap<String, IndexedDoc>,
    postings: HashMap<String, Vec<Posting>>,
}

impl IndexState {
    fn remove_doc(&mut self, path: &str) {
        let Some(doc) = self.docs.remove(path) else {
            return;
        };
        for term in &doc.terms {
            if let Some(list) = self.postings.get_mut(term) {
                list.retain(|p| p.path != path);
                if list.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }

    fn insert_doc(&mut self, section: &Section) {
        let mut terms = BTreeSet::new();
        for (field, text) in [(Field::Title, &section.title), (Field::Body, &section.content)] {
            let mut counts: HashMap<String, u32> = HashMap::new();
            for token in tokenize(text) {
                *counts.entry(token).or_default() += 1;
            }
            for (term, term_frequency) in counts {
                self.postings.entry(term.clone()).or_default().push(Posting {
                    path: section.path.clone(),
                    field,
                    term_frequency,
                });
                terms.insert(term);
            }
        }
        self.docs.insert(
            section.path.clone(),
            IndexedDoc {
                title: section.title.clone(),
                content: section.content.clone(),
                terms,
            },
        );
    }

    // Every indexed path belonging to the page `path`: the page and its fragments.
    fn page_paths(&self, path: &str) -> Vec<String> {
        let fragment_prefix = format!("{path}#");
        self.docs
            .keys()
            .filter(|p| *p == path || p.starts_with(&fragment_prefix))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub title: String,
    /// Snippet of the body around the first match.
    pub content: String,
    pub relevance: f64,
}

/// Lowercased alphanumeric runs.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

#[derive(Debug, Default)]
pub struct SearchEngine {
    index: RwLock<IndexState>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces everything indexed for the page at `section.path` with the new tree.
    ///
    /// Removal and insertion happen under one write lock, so readers see either the
    /// old page or the new one.
    pub async fn index_section(&self, section: &Section) {
        let mut index = self.index.write().await;
        for stale in index.page_paths(&section.path) {
            index.remove_doc(&stale);
        }
        for doc in section.walk() {
            index.insert_doc(doc);
        }
        tracing::debug!("Indexed {} ({} documents total)", section.path, index.docs.len());
    }

    /// Drops the page at `path` and all of its fragments.
    pub async fn remove(&self, path: &str) {
        let mut index = self.index.write().await;
        for stale in index.page_paths(path) {
            index.remove_doc(&stale);
        }
    }

    pub async fn clear(&self) {
        *self.index.write().await = IndexState::default();
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ranks indexed sections against `query`, optionally restricted to paths
    /// starting with `context`.
    pub async fn search(
        &self,
        query: &str,
        context: Option<&str>,
    ) -> Result<Vec<SearchResult>, DocumentationError> {
        ErrorContext::new("search")
            .handle(async {
                let terms: BTreeSet<String> = tokenize(query).collect();
                if terms.is_empty() {
                    return Err(CoreError::EmptyQuery);
                }
                let index = self.index.read().await;
                Ok(score(&index, &terms, context))
            })
            .await
    }
}

fn score(index: &IndexState, terms: &BTreeSet<String>, context: Option<&str>) -> Vec<SearchResult> {
    let eligible = |path: &str| context.is_none_or(|prefix| path.starts_with(prefix));

    let mut scores: HashMap<&str, f64> = HashMap::new();
    for term in terms {
        let Some(postings) = index.postings.get(term) else {
            continue;
        };
        for posting in postings.iter().filter(|p| eligible(&p.path)) {
            let tf = 1.0 + f64::from(posting.term_frequency).ln();
            *scores.entry(posting.path.as_str()).or_default() += tf * posting.field.weight();
        }
    }

    let mut results: Vec<SearchResult> = scores
        .into_iter()
        .filter_map(|(path, relevance)| {
            let doc = index.docs.get(path)?;
            Some(SearchResult {
                path: path.to_string(),
                title: doc.title.clone(),
                content: snippet(&doc.content, terms),
                relevance,
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    results
}

fn snippet(content: &str, terms: &BTreeSet<String>) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let hit = words
        .iter()
        .position(|word| tokenize(word).any(|t| terms.contains(&t)))
        .unwrap_or(0);
    let start = hit.saturating_sub(SNIPPET_WORDS_BEFORE);
    let end = (hit + SNIPPET_WORDS_AFTER).min(words.len());

    let mut out = words[start..end].join(" ");
    if start > 0 {
        out.insert_str(0, "... ");
    }
    if end < words.len() {
        out.push_str(" ...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Utc;

    fn section(path: &str, title: &str, content: &str) -> Section {
        Section {
            path: path.into(),
            title: title.into(),
            content: content.into(),
            subsections: vec![],
            fetched_at: Utc::now(),
        }
    }

    async fn sample_engine() -> SearchEngine {
        let engine = SearchEngine::new();
        engine
            .index_section(&section(
                "/docs/installation",
                "Installation Guide",
                "This guide explains how to install and configure the system.",
            ))
            .await;
        engine
            .index_section(&section(
                "/docs/api",
                "API Reference",
                "Complete API documentation with examples and use cases.",
            ))
            .await;
        engine
    }

    #[tokio::test]
    async fn test_search_finds_relevant_content() {
        let engine = sample_engine().await;
        let results = engine.search("installation configure", None).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "/docs/installation");
        assert_eq!(results[0].title, "Installation Guide");
        assert!(results[0].relevance > 0.0);
    }

    #[tokio::test]
    async fn test_title_match_outranks_body_matches() {
        let engine = SearchEngine::new();
        engine
            .index_section(&section("/b", "Overview", "widget widget widget widget widget widget"))
            .await;
        engine.index_section(&section("/a", "Widget", "Unrelated text")).await;

        let results = engine.search("widget", None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].path, "/a");
        assert!(results[0].relevance > results[1].relevance);
    }

    #[tokio::test]
    async fn test_ties_break_by_path() {
        let engine = SearchEngine::new();
        engine.index_section(&section("/zeta", "Setup", "")).await;
        engine.index_section(&section("/alpha", "Setup", "")).await;
        engine.index_section(&section("/mid", "Setup", "")).await;

        let results = engine.search("setup", None).await.unwrap();
        let paths: Vec<_> = results.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/alpha", "/mid", "/zeta"]);
    }

    #[tokio::test]
    async fn test_search_respects_context() {
        let engine = SearchEngine::new();
        engine
            .index_section(&section("/docs/api", "API Guide", "API configuration steps"))
            .await;
        engine
            .index_section(&section("/docs/user", "User Guide", "User configuration steps"))
            .await;

        let results = engine.search("configuration", Some("/docs/api")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "/docs/api");

        let results = engine.search("configuration", Some("/docs")).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.path.starts_with("/docs")));
    }

    #[tokio::test]
    async fn test_empty_search_is_error() {
        let engine = sample_engine().await;
        let err = engine.search("  ?! ", None).await.unwrap_err();
        assert_eq!(err.operation(), "search");
        assert_eq!(err.kind(), ErrorKind::Search);
    }

    #[tokio::test]
    async fn test_search_returns_empty_for_no_matches() {
        let engine = SearchEngine::new();
        let results = engine.search("nonexistent term", None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_reindex_replaces_postings() {
        let engine = SearchEngine::new();
        let mut page = section("/page", "Old Title", "legacy content");
        page.subsections.push(section("/page#legacy", "Legacy", "legacy notes"));
        engine.index_section(&page).await;
        assert_eq!(engine.len().await, 2);

        engine
            .index_section(&section("/page", "New Title", "fresh content"))
            .await;

        assert_eq!(engine.len().await, 1);
        assert!(engine.search("legacy", None).await.unwrap().is_empty());
        let results = engine.search("fresh", None).await.unwrap();
        assert_eq!(results.len(), 1);

        let state = engine.index.read().await;
        assert!(state.postings.values().flatten().all(|p| p.path == "/page"));
        assert!(state.postings.get("fresh").is_some_and(|list| list.len() == 1));
    }

    #[tokio::test]
    async fn test_remove_leaves_other_pages() {
        let engine = sample_engine().await;
        engine.index_section(&section("/docs/api-v2", "API v2", "newer api")).await;
        engine.remove("/docs/api").await;

        let results = engine.search("api", None).await.unwrap();
        let paths: Vec<_> = results.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/docs/api-v2"]);
    }

    #[tokio::test]
    async fn test_subsections_indexed_under_fragment_paths() {
        let engine = SearchEngine::new();
        let mut page = section("/guide", "Guide", "intro text setup details");
        page.subsections.push(section("/guide#setup", "Setup", "details"));
        engine.index_section(&page).await;

        let results = engine.search("setup", None).await.unwrap();
        assert_eq!(results[0].path, "/guide#setup");
        assert_eq!(results[1].path, "/guide");
    }

    #[test]
    fn test_tokenize() {
        let tokens: Vec<_> = tokenize("Hello, World! API-v2 config_file").collect();
        assert_eq!(tokens, ["hello", "world", "api", "v2", "config", "file"]);
    }

    #[test]
    fn test_snippet_windows_around_match() {
        let content = (0..100).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let terms: BTreeSet<String> = ["w50".to_string()].into_iter().collect();
        let snip = snippet(&content, &terms);
        assert!(snip.starts_with("... w40"));
        assert!(snip.ends_with("w79 ..."));
        assert!(snip.contains("w50"));
    }
}
