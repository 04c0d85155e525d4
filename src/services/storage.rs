use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::JobId;

/// Key for an uploaded source image.
pub fn upload_key(id: Uuid) -> String {
    format!("uploads/{id}")
}

/// Key for a job's output artifact.
pub fn result_key(job_id: JobId, extension: &str) -> String {
    format!("results/{job_id}.{extension}")
}

/// Content type for a stored artifact, from its key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("zip") => "application/zip",
        Some("glb") => "model/gltf-binary",
        Some("obj") => "model/obj",
        _ => "application/octet-stream",
    }
}

/// Where uploads and result artifacts live.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    /// Upload bytes to R2.
    pub async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }

    /// Download bytes from R2.
    pub async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        if response.status_code() == 404 {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(response.to_vec())
    }
}

#[async_trait]
impl ArtifactStore for R2Client {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.upload(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.download(key).await
    }
}

/// Process-local artifact store for tests and local runs.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_keys_and_types() {
        let id = Uuid::nil();
        let key = result_key(id, "png");
        assert_eq!(key, format!("results/{id}.png"));
        assert_eq!(content_type_for(&key), "image/png");
        assert_eq!(content_type_for("results/x.zip"), "application/zip");
        assert_eq!(content_type_for(&upload_key(id)), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryArtifactStore::new();
        store.put("results/a.png", b"png", "image/png").await.unwrap();
        assert_eq!(store.get("results/a.png").await.unwrap(), b"png");
        assert!(matches!(
            store.get("results/missing.png").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
