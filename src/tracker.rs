//! Registry of resources exposed to protocol clients.
//!
//! Independent of the section cache: entries never expire and are only removed
//! when the caller says so.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{CoreError, DocumentationError, ErrorContext};

#[derive(Debug, Default)]
pub struct ResourceTracker {
    resources: RwLock<BTreeMap<String, Value>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `payload` under `id`, replacing any previous payload.
    pub async fn register(&self, id: impl Into<String>, payload: Value) {
        let id = id.into();
        tracing::debug!("Registering resource {}", id);
        self.resources.write().await.insert(id, payload);
    }

    pub async fn get(&self, id: &str) -> Result<Value, DocumentationError> {
        ErrorContext::new(format!("get_resource:{id}"))
            .handle(async {
                self.resources
                    .read()
                    .await
                    .get(id)
                    .cloned()
                    .ok_or_else(|| CoreError::ResourceNotFound(id.to_string()))
            })
            .await
    }

    /// Removing an id that is not registered is not an error.
    pub async fn remove(&self, id: &str) {
        self.resources.write().await.remove(id);
    }

    /// All registered resources, ordered by id.
    pub async fn list(&self) -> Vec<(String, Value)> {
        self.resources
            .read()
            .await
            .iter()
            .map(|(id, payload)| (id.clone(), payload.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.resources.read().await.is_empty()
    }
}
