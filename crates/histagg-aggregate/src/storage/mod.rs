//! Object store gateway
//!
//! Typed operations against buckets: list, read, write, copy, existence
//! check, deadline-bounded delete, and retention-hold patching. The
//! [`ObjectStore`] trait is the seam between the aggregation pipeline and
//! the storage backend; [`S3Store`] is the production implementation and
//! [`memory::MemoryStore`] backs the tests.

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{ObjectLockLegalHold, ObjectLockLegalHoldStatus},
    Client,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument};

use histagg_common::{AggError, Result};
use histagg_common::retry::DeadlinePolicy;

pub mod config;
pub mod memory;

/// One staged object as returned by a listing.
///
/// Immutable once listed for a run; owned by the staging bucket until
/// retired.
#[derive(Debug, Clone)]
pub struct StagedObject {
    /// Full key within the bucket
    pub key: String,
    /// Object size in bytes
    pub size: i64,
    /// Creation/modification timestamp, when the backend reports one
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of a successful write.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub key: String,
    pub checksum: String,
    pub size: i64,
}

/// Typed operations against the object store.
///
/// Implementations perform single calls without retrying (except `delete`,
/// whose deadline is part of the gateway contract); retry policy belongs to
/// the pipeline stages that call them.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects under `prefix`. Restartable per call; ordering follows
    /// the backend's key order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<StagedObject>>;

    /// Read an object's full contents.
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Write an object, replacing any existing one.
    async fn write(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<UploadResult>;

    /// Server-side copy between buckets.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()>;

    /// Whether an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Delete an object, retrying internally until `deadline` elapses.
    ///
    /// Deletion of an object whose retention hold is set fails; callers
    /// must clear the hold first.
    async fn delete(&self, bucket: &str, key: &str, deadline: Duration) -> Result<()>;

    /// Set or clear the retention hold on an object.
    async fn set_hold(&self, bucket: &str, key: &str, held: bool) -> Result<()>;
}

/// S3-backed object store.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub async fn new(config: config::StorageConfig) -> Result<Self> {
        debug!("Initializing object store with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "histagg-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Object store client initialized");

        Ok(Self { client })
    }

    fn storage_err(context: &str, e: impl std::fmt::Display) -> AggError {
        AggError::Storage(format!("{}: {}", context, e))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<StagedObject>> {
        debug!("Listing objects in s3://{}/{}", bucket, prefix);

        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix);

            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                let msg = e.to_string();
                if msg.contains("NoSuchBucket") {
                    AggError::NotFound(format!("bucket '{}'", bucket))
                } else {
                    Self::storage_err("Failed to list objects", e)
                }
            })?;

            for obj in response.contents() {
                let Some(key) = obj.key() else { continue };
                objects.push(StagedObject {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0),
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| DateTime::parse_from_rfc3339(&dt.to_string()).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                });
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        debug!("Listed {} objects under s3://{}/{}", objects.len(), bucket, prefix);

        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        debug!("Reading s3://{}/{}", bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("NoSuchKey") || msg.contains("NotFound") {
                    AggError::NotFound(format!("s3://{}/{}", bucket, key))
                } else {
                    Self::storage_err("Failed to read object", e)
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read object body")
            .map_err(|e| AggError::Storage(e.to_string()))?
            .into_bytes()
            .to_vec();

        debug!("Read {} bytes from s3://{}/{}", data.len(), bucket, key);

        Ok(data)
    }

    #[instrument(skip(self, data))]
    async fn write(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<UploadResult> {
        let checksum = calculate_sha256(&data);
        let size = data.len() as i64;

        debug!("Writing {} bytes to s3://{}/{}", size, bucket, key);

        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .map_err(|e| Self::storage_err("Failed to write object", e))?;

        info!("Successfully wrote s3://{}/{}", bucket, key);

        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }

    #[instrument(skip(self))]
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        debug!(
            "Copying s3://{}/{} to s3://{}/{}",
            src_bucket, src_key, dst_bucket, dst_key
        );

        let copy_source = format!("{}/{}", src_bucket, src_key);

        self.client
            .copy_object()
            .bucket(dst_bucket)
            .copy_source(&copy_source)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| Self::storage_err("Failed to copy object", e))?;

        info!(
            "Successfully copied s3://{}/{} to s3://{}/{}",
            src_bucket, src_key, dst_bucket, dst_key
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("NotFound") || msg.contains("404") {
                    Ok(false)
                } else {
                    Err(Self::storage_err("Failed to check object existence", e))
                }
            },
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str, deadline: Duration) -> Result<()> {
        debug!("Deleting s3://{}/{} (deadline: {:?})", bucket, key, deadline);

        let policy = DeadlinePolicy::new(deadline);
        let client = self.client.clone();

        policy
            .run("delete", || {
                let client = client.clone();
                let bucket = bucket.to_string();
                let key = key.to_string();
                async move {
                    client
                        .delete_object()
                        .bucket(&bucket)
                        .key(&key)
                        .send()
                        .await
                        .map(|_| ())
                        .map_err(|e| Self::storage_err("Failed to delete object", e))
                }
            })
            .await?;

        info!("Successfully deleted s3://{}/{}", bucket, key);

        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_hold(&self, bucket: &str, key: &str, held: bool) -> Result<()> {
        let status = if held {
            ObjectLockLegalHoldStatus::On
        } else {
            ObjectLockLegalHoldStatus::Off
        };

        debug!("Setting hold={} on s3://{}/{}", held, bucket, key);

        self.client
            .put_object_legal_hold()
            .bucket(bucket)
            .key(key)
            .legal_hold(ObjectLockLegalHold::builder().status(status).build())
            .send()
            .await
            .map_err(|e| Self::storage_err("Failed to patch object hold", e))?;

        Ok(())
    }
}

fn calculate_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
