//! Commit pipeline
//!
//! Makes a finished container durable before anything may be retired:
//!
//! 1. **Upload** the compressed container to the staging bucket (the spill
//!    file is released on success).
//! 2. **Replicate** it to the backup bucket with a server-side copy.
//! 3. **Verify** its presence in the backup bucket with an independent
//!    existence check — a copy that "succeeded" but cannot be re-read is a
//!    fatal inconsistency.
//!
//! Each step crosses the network boundary and runs under the fixed retry
//! policy. Failure at any step aborts the run with the sources untouched.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::info;

use histagg_common::retry::RetryPolicy;
use histagg_common::{AggError, Result};

use crate::archive::read_spill;
use crate::naming::{RunNaming, ARCHIVE_CONTENT_TYPE};
use crate::storage::ObjectStore;

/// Proof of a completed commit.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// Key of the archive in both buckets
    pub archive_key: String,
    /// Compressed size as uploaded
    pub size: i64,
    /// Checksum of the uploaded bytes
    pub checksum: String,
}

/// Uploads, replicates, and verifies one run's container.
pub struct CommitPipeline {
    retry: RetryPolicy,
}

impl Default for CommitPipeline {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
        }
    }
}

impl CommitPipeline {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub async fn commit<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        naming: &RunNaming,
        mut spill: NamedTempFile,
    ) -> Result<CommitReceipt> {
        let container = read_spill(&mut spill)?;
        let compressed = compress_gzip(&container)?;

        info!(
            "Uploading archive to '{}/{}' ({} bytes compressed from {})",
            naming.staging_bucket,
            naming.archive_key,
            compressed.len(),
            container.len()
        );

        let upload = self
            .retry
            .run("upload", || {
                store.write(
                    &naming.staging_bucket,
                    &naming.archive_key,
                    compressed.clone(),
                    Some(ARCHIVE_CONTENT_TYPE.to_string()),
                )
            })
            .await
            .map_err(|e| AggError::CommitFailed {
                stage: "upload",
                reason: e.to_string(),
            })?;

        // Spill storage is released once the upload holds the bytes.
        drop(spill);

        info!(
            "Copying archive to '{}/{}'",
            naming.backup_bucket, naming.archive_key
        );

        self.retry
            .run("copy", || {
                store.copy(
                    &naming.staging_bucket,
                    &naming.archive_key,
                    &naming.backup_bucket,
                    &naming.archive_key,
                )
            })
            .await
            .map_err(|e| AggError::CommitFailed {
                stage: "copy",
                reason: e.to_string(),
            })?;

        let present = self
            .retry
            .run("verify", || {
                store.exists(&naming.backup_bucket, &naming.archive_key)
            })
            .await
            .map_err(|e| AggError::CommitFailed {
                stage: "verify",
                reason: e.to_string(),
            })?;

        if !present {
            return Err(AggError::VerificationFailed {
                bucket: naming.backup_bucket.clone(),
                key: naming.archive_key.clone(),
            });
        }

        info!(
            "Archive committed and verified at '{}/{}'",
            naming.backup_bucket, naming.archive_key
        );

        Ok(CommitReceipt {
            archive_key: naming.archive_key.clone(),
            size: upload.size,
            checksum: upload.checksum,
        })
    }
}

/// Compress the container bytes for upload. Pure byte transform; the
/// container format itself stays untouched.
fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBuilder;
    use crate::storage::memory::MemoryStore;
    use chrono::NaiveDate;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn naming() -> RunNaming {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        RunNaming::new("payments", date, 1705363200)
    }

    fn store_with_buckets(naming: &RunNaming) -> MemoryStore {
        let store = MemoryStore::new();
        store.create_bucket(&naming.staging_bucket);
        store.create_bucket(&naming.backup_bucket);
        store
    }

    fn spill_with_one_entry() -> NamedTempFile {
        let mut builder = ArchiveBuilder::new(0).unwrap();
        builder.append("a.json", b"{\"a\":1}").unwrap();
        builder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_commit_writes_both_buckets_and_verifies() {
        let naming = naming();
        let store = store_with_buckets(&naming);

        let receipt = CommitPipeline::default()
            .commit(&store, &naming, spill_with_one_entry())
            .await
            .unwrap();

        assert_eq!(receipt.archive_key, naming.archive_key);
        assert!(store.contains(&naming.staging_bucket, &naming.archive_key));
        assert!(store.contains(&naming.backup_bucket, &naming.archive_key));

        // The uploaded object is the gzip of the tar container
        let uploaded = store.object(&naming.staging_bucket, &naming.archive_key).unwrap();
        let mut decoder = GzDecoder::new(uploaded.as_slice());
        let mut container = Vec::new();
        decoder.read_to_end(&mut container).unwrap();

        let mut archive = tar::Archive::new(container.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_failure_aborts_with_commit_failed() {
        let naming = naming();
        let store = store_with_buckets(&naming);
        store.fail_copies(true);

        let err = CommitPipeline::default()
            .commit(&store, &naming, spill_with_one_entry())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AggError::CommitFailed { stage: "copy", .. }
        ));
        // Staging archive may exist, backup must not
        assert!(store.contains(&naming.staging_bucket, &naming.archive_key));
        assert!(!store.contains(&naming.backup_bucket, &naming.archive_key));
    }

    #[tokio::test]
    async fn test_absent_after_copy_is_verification_failed() {
        let naming = naming();
        let store = store_with_buckets(&naming);
        store.suppress_from_exists(&naming.archive_key);

        let err = CommitPipeline::default()
            .commit(&store, &naming, spill_with_one_entry())
            .await
            .unwrap_err();

        assert!(matches!(err, AggError::VerificationFailed { .. }));
    }

    #[test]
    fn test_compress_gzip_round_trip() {
        let data = b"container bytes";
        let compressed = compress_gzip(data).unwrap();

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
