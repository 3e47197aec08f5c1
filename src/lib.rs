//! Documentation Explorer MCP Service
//!
//! Fetches structured documentation pages from a remote site, caches them, and
//! indexes them for relevance search. An MCP server exposes the pages and the
//! search to protocol clients.
//!
//! # Features
//!
//! - Parse HTML pages into nested sections by heading level
//! - TTL + LRU cache with per-path fetch deduplication and optional persistence
//! - Field-weighted search with optional path-prefix filtering
//! - Uniform errors that keep the operation name and the full causal chain
//!
//! # Modules
//!
//! - [`cache`]: Section cache
//! - [`config`]: Runtime configuration
//! - [`docs_parser`]: HTML to section tree
//! - [`error`]: [`DocumentationError`](error::DocumentationError) and [`ErrorContext`](error::ErrorContext)
//! - [`fetcher`]: HTTP client capability
//! - [`manager`]: Fetch-or-cache orchestration
//! - [`mcp`]: MCP server implementation and protocol handling
//! - [`search`]: Inverted index and ranking
//! - [`tracker`]: Resources exposed to clients

pub mod cache;
pub mod config;
pub mod docs_parser;
pub mod error;
pub mod fetcher;
pub mod manager;
pub mod mcp;
pub mod search;
pub mod section;
pub mod server;
pub mod tracker;

pub use error::{DocumentationError, ErrorContext, ErrorKind};
pub use manager::DocumentationManager;
pub use search::{SearchEngine, SearchResult};
pub use section::Section;
pub use tracker::ResourceTracker;
