//! MCP front end for the documentation explorer.
//!
//! Exposes the documentation core to protocol clients:
//!
//! - tool `fetch_section`: structured section tree for a page path
//! - tool `search_docs`: relevance-ranked search over fetched pages
//! - resources: every entry of the [`ResourceTracker`], under `docs://<path>`
//!
//! # Example
//! ```no_run
//! use docs_explorer_mcp::config::DocsConfig;
//! use docs_explorer_mcp::mcp::DocExplorer;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let explorer = DocExplorer::from_config(&DocsConfig::default()).await?;
//!     explorer.persist().await?;
//!     Ok(())
//! }
//! ```

use rmcp::model::{
    AnnotateAble, Implementation, ListPromptsResult, ListResourcesResult, PaginatedRequestParam,
    ProtocolVersion, RawResource, ReadResourceRequestParam, ReadResourceResult, Resource,
    ResourceContents, ServerCapabilities,
};
use rmcp::service::RequestContext;
use rmcp::{Error as McpError, RoleServer, ServerHandler, model::ServerInfo, schemars, tool};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::cache::{Cache, InMemoryCache};
use crate::config::DocsConfig;
use crate::error::{DocumentationError, ErrorContext};
use crate::fetcher::ReqwestClient;
use crate::manager::DocumentationManager;
use crate::search::SearchEngine;
use crate::section::Section;
use crate::tracker::ResourceTracker;

const RESOURCE_SCHEME: &str = "docs://";

/// Resource id for a section path, e.g. `/api/auth` -> `docs://api/auth`.
pub fn resource_uri(path: &str) -> String {
    format!("{}{}", RESOURCE_SCHEME, path.trim_start_matches('/'))
}

/// Server state shared by every protocol session.
#[derive(Clone)]
pub struct DocExplorer {
    manager: Arc<DocumentationManager>,
    tracker: Arc<ResourceTracker>,
}

#[tool(tool_box)]
impl DocExplorer {
    pub fn new(manager: Arc<DocumentationManager>, tracker: Arc<ResourceTracker>) -> Self {
        Self { manager, tracker }
    }

    /// Builds the production stack from `config`: HTTP client, cache (restored
    /// from `cache_dir` when set), a search index over the configured sections and
    /// the restored pages, and the configured sections as resources.
    pub async fn from_config(config: &DocsConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let client = Arc::new(ReqwestClient::new(config.request_timeout)?);
        let mut cache = InMemoryCache::new(config.cache_capacity);
        if let Some(dir) = &config.cache_dir {
            cache = cache.with_cache_dir(dir.clone());
        }
        cache.load().await?;

        let search = Arc::new(SearchEngine::new());
        let manager = Arc::new(DocumentationManager::new(
            config,
            client,
            Arc::new(cache),
            search,
        ));

        manager.rebuild_index().await;

        let tracker = Arc::new(ResourceTracker::new());
        for entry in &config.sections {
            let payload = serde_json::to_value(entry)?;
            tracker.register(resource_uri(&entry.path), payload).await;
        }

        Ok(Self::new(manager, tracker))
    }

    pub fn manager(&self) -> &Arc<DocumentationManager> {
        &self.manager
    }

    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    /// Writes the cache to its configured directory, if any.
    pub async fn persist(&self) -> std::io::Result<()> {
        self.manager.cache().save().await
    }

    #[tool(description = "Fetch a documentation page as a structured section tree (title, content, subsections)")]
    async fn fetch_section(
        &self,
        #[tool(param)]
        #[schemars(description = "Path of the documentation page relative to the base URL, e.g. '/knowledge-base/setup'")]
        path: String,
    ) -> Result<String, DocumentationError> {
        let section = self.manager.fetch_section(&path).await?;
        self.track(&section).await;
        ErrorContext::new("fetch_section").handle_sync(|| serde_json::to_string_pretty(&section))
    }

    #[tool(description = "Search fetched documentation. Results are ordered by relevance; title matches rank above body matches.")]
    async fn search_docs(
        &self,
        #[tool(param)]
        #[schemars(description = "Search query")]
        query: String,

        #[tool(param)]
        #[schemars(description = "Optional path prefix to search within, e.g. '/api'")]
        context: Option<String>,
    ) -> Result<String, DocumentationError> {
        let results = self
            .manager
            .search_engine()
            .search(&query, context.as_deref())
            .await?;
        tracing::info!("Search for {:?} returned {} results", query, results.len());
        ErrorContext::new("search_docs").handle_sync(|| serde_json::to_string_pretty(&results))
    }

    async fn track(&self, section: &Section) {
        let payload = json!({
            "path": section.path,
            "title": section.title,
            "content": section.content,
            "fetched_at": section.fetched_at,
        });
        self.tracker.register(resource_uri(&section.path), payload).await;
    }

    async fn resource_list(&self) -> Vec<Resource> {
        self.tracker
            .list()
            .await
            .into_iter()
            .map(|(uri, payload)| {
                let name = payload
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or(&uri)
                    .to_string();
                let mut raw = RawResource::new(uri, name.clone());
                raw.description = Some(format!("Documentation for {}", name));
                raw.mime_type = Some("application/json".to_string());
                raw.no_annotation()
            })
            .collect()
    }

    async fn resource_text(&self, uri: &str) -> Result<String, DocumentationError> {
        let payload = self.tracker.get(uri).await?;
        ErrorContext::new(format!("read_resource:{uri}"))
            .handle_sync(|| serde_json::to_string_pretty(&payload))
    }
}

#[tool(tool_box)]
impl ServerHandler for DocExplorer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "This server fetches, caches and searches documentation pages. \
                Use 'fetch_section' with a page path to retrieve its structured content, \
                and 'search_docs' to search pages fetched so far, optionally within a path prefix. \
                Known sections are listed as docs:// resources."
                    .to_string(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            resources: self.resource_list().await,
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri }: ReadResourceRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        match self.resource_text(&uri).await {
            Ok(text) => Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(text, uri)],
            }),
            Err(err) => Err(McpError::resource_not_found(
                err.to_string(),
                Some(json!({ "uri": uri })),
            )),
        }
    }

    async fn list_prompts(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        // We don't use prompts in this implementation
        Ok(ListPromptsResult {
            next_cursor: None,
            prompts: vec![],
        })
    }
}
