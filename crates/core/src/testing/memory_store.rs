//! In-memory object store for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::artifact::{ObjectStore, ObjectStoreError};

/// `ObjectStore` backed by a map, producing `mem://` URIs.
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, kind: &str, bytes: &[u8]) -> Result<String, ObjectStoreError> {
        let uri = format!("mem://{}/{}", kind, uuid::Uuid::new_v4());
        self.objects.write().await.insert(uri.clone(), bytes.to_vec());
        Ok(uri)
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .read()
            .await
            .get(uri)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(uri.to_string()))
    }
}
