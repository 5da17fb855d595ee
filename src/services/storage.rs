use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

/// Durable home for generated images.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `data` for `task_id` and return an opaque locator for it.
    async fn put(&self, task_id: Uuid, data: &[u8]) -> Result<String, StorageError>;
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    bucket_name: String,
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

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
        })
    }

    /// Upload raw bytes under `key`.
    pub async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Status(status));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for R2Client {
    async fn put(&self, task_id: Uuid, data: &[u8]) -> Result<String, StorageError> {
        let key = object_key(task_id, Utc::now());
        self.upload(&key, data, "image/png").await?;

        let locator = locator(&self.bucket_name, &key);
        tracing::info!(task_id = %task_id, locator = %locator, bytes = data.len(), "Uploaded image to R2");
        Ok(locator)
    }
}

/// Date-partitioned object key: `YYYY/MM/DD/<timestamp>_<task id>.png`.
pub fn object_key(task_id: Uuid, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}_{}.png",
        now.format("%Y/%m/%d"),
        now.format("%Y%m%dT%H%M%S%6f"),
        task_id
    )
}

pub fn locator(bucket_name: &str, key: &str) -> String {
    format!("r2://{bucket_name}/{key}")
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object storage returned HTTP {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
