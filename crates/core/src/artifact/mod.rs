//! Artifact and image object storage.

use std::path::PathBuf;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object uri: {0}")]
    InvalidUri(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Content-addressed-ish blob storage for generated images and compiled decks.
///
/// `put` returns an opaque URI that `get` accepts back; URIs are stable across
/// process restarts for durable implementations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a blob and return its URI.
    async fn put(&self, kind: &str, bytes: &[u8]) -> Result<String, ObjectStoreError>;

    /// Fetch a blob by URI.
    async fn get(&self, uri: &str) -> Result<Vec<u8>, ObjectStoreError>;
}

/// Filesystem-backed object store producing `file://` URIs.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, uri: &str) -> Result<PathBuf, ObjectStoreError> {
        let path = uri
            .strip_prefix("file://")
            .ok_or_else(|| ObjectStoreError::InvalidUri(uri.to_string()))?;
        Ok(PathBuf::from(path))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, kind: &str, bytes: &[u8]) -> Result<String, ObjectStoreError> {
        let dir = self.root.join(kind);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ObjectStoreError::Io(e.to_string()))?;

        let path = dir.join(uuid::Uuid::new_v4().to_string());
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ObjectStoreError::Io(e.to_string()))?;

        Ok(format!("file://{}", path.display()))
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_for(uri)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(uri.to_string()))
            }
            Err(e) => Err(ObjectStoreError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let uri = store.put("images", b"png bytes").await.unwrap();
        assert!(uri.starts_with("file://"));

        let bytes = store.get(&uri).await.unwrap();
        assert_eq!(bytes, b"png bytes");
    }

    #[tokio::test]
    async fn test_get_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let uri = format!("file://{}/images/nope", dir.path().display());
        assert!(matches!(
            store.get(&uri).await,
            Err(ObjectStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_foreign_uri() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        assert!(matches!(
            store.get("s3://bucket/key").await,
            Err(ObjectStoreError::InvalidUri(_))
        ));
    }
}
