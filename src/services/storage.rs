use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

const CONTENT_TYPE: &str = "application/octet-stream";

/// Object key for one version of a rider's content. Keyed by hash so a
/// rejected reupload never overwrites what a sealed rider points at.
pub fn rider_key(token: Uuid, content_hash: &str) -> String {
    format!("riders/{token}/{content_hash}")
}

/// Rider content in Cloudflare R2 (S3-compatible).
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

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    /// Store content under `key`, overwriting any previous upload.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, CONTENT_TYPE)
            .await?;
        match response.status_code() {
            200..=299 => Ok(()),
            status => Err(StorageError::Status(status)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await?;
        match response.status_code() {
            200..=299 => Ok(response.to_vec()),
            404 => Err(StorageError::Missing(key.to_string())),
            status => Err(StorageError::Status(status)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("S3 returned status {0}")]
    Status(u16),

    #[error("No stored content at {0}")]
    Missing(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
