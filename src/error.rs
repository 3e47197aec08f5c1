//! Uniform error type for everything that crosses the manager / search boundary.
//!
//! Component errors ([`FetchError`], [`ParseError`], [`ConfigError`]) stay local to
//! the module that raises them. [`ErrorContext`] wraps a unit of work and turns any
//! failure into a [`DocumentationError`] tagged with the operation name, keeping the
//! full causal chain of the original failure.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use rmcp::model::{Content, IntoContents};
use serde::Serialize;

use crate::config::ConfigError;
use crate::fetcher::FetchError;
use crate::docs_parser::ParseError;

/// Boxed failure accepted by [`ErrorContext`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared handle to the original failure.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Category of a [`DocumentationError`], derived from its cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure or non-success HTTP status.
    Network,
    /// The request deadline was exceeded.
    Timeout,
    /// Malformed or unparseable content.
    Parse,
    /// Unregistered tracker id.
    ResourceNotFound,
    /// Cache invariant violation.
    Cache,
    /// Invalid search request.
    Search,
    /// Invalid or unreadable configuration.
    Config,
    /// Anything the crate does not classify.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Parse => "PARSE_ERROR",
            ErrorKind::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorKind::Cache => "CACHE_ERROR",
            ErrorKind::Search => "SEARCH_ERROR",
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::Other => "ERROR",
        };
        f.write_str(name)
    }
}

/// One failure in a causal chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainLink {
    /// Operation name when the failure was itself a [`DocumentationError`].
    pub operation: Option<String>,
    pub message: String,
}

/// Failures the crate raises for itself rather than receiving from a dependency.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Search query cannot be empty")]
    EmptyQuery,

    #[error("Corrupt cache entry for {0}")]
    CorruptEntry(String),
}

/// Error surfaced to callers of the documentation core.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Error during {operation}: {cause}")]
pub struct DocumentationError {
    operation: String,
    kind: ErrorKind,
    #[source]
    cause: Cause,
    chain: Vec<ChainLink>,
}

impl DocumentationError {
    /// Wraps `cause` for `operation`, classifying it and recording its chain.
    pub fn new(operation: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        let operation = operation.into();
        let cause: Cause = Arc::from(cause.into());

        if let Some(inner) = cause.downcast_ref::<DocumentationError>() {
            let mut chain = inner.chain.clone();
            chain.push(ChainLink {
                operation: Some(inner.operation.clone()),
                message: inner.to_string(),
            });
            return Self {
                operation,
                kind: inner.kind,
                cause: cause.clone(),
                chain,
            };
        }

        Self {
            kind: classify(cause.as_ref()),
            chain: source_chain(cause.as_ref()),
            operation,
            cause,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The failure that was raised inside the scope.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// Every failure behind this error, oldest first.
    pub fn chain(&self) -> &[ChainLink] {
        &self.chain
    }
}

fn classify(cause: &(dyn StdError + Send + Sync + 'static)) -> ErrorKind {
    if let Some(fetch) = cause.downcast_ref::<FetchError>() {
        return match fetch {
            FetchError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Network,
        };
    }
    if cause.downcast_ref::<ParseError>().is_some() {
        return ErrorKind::Parse;
    }
    if cause.downcast_ref::<ConfigError>().is_some() {
        return ErrorKind::Config;
    }
    match cause.downcast_ref::<CoreError>() {
        Some(CoreError::ResourceNotFound(_)) => ErrorKind::ResourceNotFound,
        Some(CoreError::EmptyQuery) => ErrorKind::Search,
        Some(CoreError::CorruptEntry(_)) => ErrorKind::Cache,
        None => ErrorKind::Other,
    }
}

// Walks `source()` from the cause down to the root, then flips it so the root comes first.
fn source_chain(cause: &(dyn StdError + 'static)) -> Vec<ChainLink> {
    let mut links = Vec::new();
    let mut current = Some(cause);
    while let Some(err) = current {
        links.push(ChainLink {
            operation: None,
            message: err.to_string(),
        });
        current = err.source();
    }
    links.reverse();
    links
}

impl IntoContents for DocumentationError {
    fn into_contents(self) -> Vec<Content> {
        vec![Content::text(format!("{}: {}", self.kind, self))]
    }
}

/// Names a unit of work so that its failures can be reported uniformly.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    operation: String,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Runs `work`, re-raising any failure as a [`DocumentationError`].
    pub async fn handle<T, E, F>(&self, work: F) -> Result<T, DocumentationError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        work.await.map_err(|err| self.wrap(err))
    }

    /// Synchronous counterpart of [`ErrorContext::handle`].
    pub fn handle_sync<T, E, F>(&self, work: F) -> Result<T, DocumentationError>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<BoxError>,
    {
        work().map_err(|err| self.wrap(err))
    }

    fn wrap(&self, err: impl Into<BoxError>) -> DocumentationError {
        let err = DocumentationError::new(self.operation.clone(), err);
        tracing::debug!(operation = %err.operation, kind = %err.kind, "operation failed: {}", err.cause);
        err
    }
}
