//! Runtime configuration for the documentation explorer.
//!
//! Values come from an optional JSON file and are then overridden by CLI flags
//! (see `main.rs`). Durations are stored as whole seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DocumentationError, ErrorContext};
use crate::section::Section;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid base_url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// A documentation section announced up-front as a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionEntry {
    pub path: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl SectionEntry {
    /// Placeholder section searchable before the page is first fetched.
    pub fn to_section(&self) -> Section {
        Section {
            path: self.path.clone(),
            title: self.title.clone(),
            content: self
                .content
                .clone()
                .unwrap_or_else(|| format!("Documentation section for {}", self.title)),
            subsections: Vec::new(),
            fetched_at: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocsConfig {
    /// Root URL every section path is resolved against.
    #[serde(default = "default_base_url", alias = "docs_base_url")]
    pub base_url: String,

    #[serde(default = "default_cache_ttl", with = "secs")]
    pub cache_ttl: Duration,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_request_timeout", with = "secs")]
    pub request_timeout: Duration,

    /// Directory the cache is persisted to between runs. No persistence when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default)]
    pub sections: Vec<SectionEntry>,
}

fn default_base_url() -> String {
    "https://docs.unblu.com".to_string()
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_cache_capacity() -> usize {
    100
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cache_ttl: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
            request_timeout: default_request_timeout(),
            cache_dir: None,
            sections: Vec::new(),
        }
    }
}

impl DocsConfig {
    /// Loads a JSON config file. Missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DocumentationError> {
        let path = path.as_ref();
        ErrorContext::new("load_config").handle_sync(|| {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok::<_, ConfigError>(config)
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "cache_capacity",
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "request_timeout",
            });
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
