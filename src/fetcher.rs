//! HTTP access to the documentation source.
//!
//! [`HttpClient`] is the single capability the documentation core needs from the
//! network: fetch the raw body at a URL. [`ReqwestClient`] is the production
//! implementation; tests swap in their own.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request error: {0}")]
    Request(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Server returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Request(err.to_string())
    }
}

/// Fetches the raw body of a document.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, FetchError>;
}

/// Joins `base_url` and `path` with exactly one slash between them.
pub fn build_url(base_url: &str, path: &str) -> Result<String, FetchError> {
    let url = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_matches('/')
    );
    Url::parse(&url)?;
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
    timeout: Duration,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("docs-explorer-mcp/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        tracing::debug!("Fetching documentation from: {}", url);

        let response = self
            .client
            .get(url)
            .header("Accept", "text/html")
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| self.classify(e))
    }
}

impl ReqwestClient {
    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::from(err)
        }
    }
}
