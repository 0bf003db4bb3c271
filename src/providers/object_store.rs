//! Object-storage seam and a filesystem-backed implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Errors from object storage.
#[derive(Debug, Error, Diagnostic)]
pub enum ObjectStoreError {
    #[error("object not found: {bucket}/{key}")]
    #[diagnostic(code(lectern::object_store::not_found))]
    NotFound { bucket: String, key: String },

    #[error("access to {bucket}/{key} forbidden")]
    #[diagnostic(code(lectern::object_store::forbidden))]
    Forbidden { bucket: String, key: String },

    #[error("object storage I/O error: {0}")]
    #[diagnostic(code(lectern::object_store::io))]
    Io(String),
}

/// Whole-object byte access plus presigned read URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the full object.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// A URL a client (or the chat model) can read the object from for the
    /// given validity window.
    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ObjectStoreError>;
}

/// Filesystem-backed object store: `root/bucket/key`.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf, ObjectStoreError> {
        // Reject traversal outside the bucket root.
        let key_path = Path::new(key);
        let escapes = key_path.components().any(|c| {
            matches!(
                c,
                std::path::Component::ParentDir | std::path::Component::RootDir
            )
        });
        if escapes || bucket.contains("..") {
            return Err(ObjectStoreError::Forbidden {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(self.root.join(bucket).join(key_path))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.resolve(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(ObjectStoreError::Forbidden {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(err) => Err(ObjectStoreError::Io(err.to_string())),
        }
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        _ttl: Duration,
    ) -> Result<String, ObjectStoreError> {
        let path = self.resolve(bucket, key)?;
        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_objects_under_the_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let bucket_dir = dir.path().join("course-files");
        tokio::fs::create_dir_all(&bucket_dir).await.unwrap();
        tokio::fs::write(bucket_dir.join("a.pdf"), b"%PDF").await.unwrap();

        let store = FsObjectStore::new(dir.path());
        let bytes = store.get("course-files", "a.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF");
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.get("b", "missing.pdf").await,
            Err(ObjectStoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn traversal_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.get("b", "../etc/passwd").await,
            Err(ObjectStoreError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn presign_returns_a_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let url = store
            .presign("b", "img/p4.png", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("img/p4.png"));
    }
}
