//! In-memory object store
//!
//! Hermetic [`ObjectStore`] implementation used by the test suite. Models
//! the two behaviors the pipeline's correctness depends on — retention
//! holds blocking deletion, and copy/verify being independent operations —
//! and exposes fault-injection knobs so every failure path is reachable
//! without a storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use histagg_common::{AggError, Result};

use super::{ObjectStore, StagedObject, UploadResult};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    hold: bool,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Keys whose reads fail this many more times before succeeding
    transient_read_failures: HashMap<String, u32>,
    /// Keys whose reads always fail
    unreadable: HashSet<String>,
    /// All copies fail while set
    fail_copies: bool,
    /// Keys whose deletes always fail
    undeletable: HashSet<String>,
    /// Keys whose hold patches always fail
    hold_patch_fails: HashSet<String>,
    /// Keys reported absent by `exists` regardless of contents
    suppressed_from_exists: HashSet<String>,
}

/// In-memory, hold-aware object store.
#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
    faults: Mutex<Faults>,
    mutations: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_bucket(&self, bucket: &str) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(bucket.to_string()).or_default();
    }

    /// Seed an object, optionally under retention hold (staged backups
    /// arrive held).
    pub fn seed_object(&self, bucket: &str, key: &str, data: &[u8], hold: bool) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                hold,
                last_modified: Utc::now(),
            },
        );
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// The next `count` reads of `key` fail, then reads succeed.
    pub fn fail_reads(&self, key: &str, count: u32) {
        let mut faults = self.faults.lock().unwrap();
        faults.transient_read_failures.insert(key.to_string(), count);
    }

    /// Every read of `key` fails.
    pub fn make_unreadable(&self, key: &str) {
        let mut faults = self.faults.lock().unwrap();
        faults.unreadable.insert(key.to_string());
    }

    /// Every copy fails while enabled.
    pub fn fail_copies(&self, fail: bool) {
        let mut faults = self.faults.lock().unwrap();
        faults.fail_copies = fail;
    }

    /// Every delete of `key` fails.
    pub fn make_undeletable(&self, key: &str) {
        let mut faults = self.faults.lock().unwrap();
        faults.undeletable.insert(key.to_string());
    }

    /// Every hold patch of `key` fails.
    pub fn fail_hold_patch(&self, key: &str) {
        let mut faults = self.faults.lock().unwrap();
        faults.hold_patch_fails.insert(key.to_string());
    }

    /// `exists` reports `key` absent even when it is present.
    pub fn suppress_from_exists(&self, key: &str) {
        let mut faults = self.faults.lock().unwrap();
        faults.suppressed_from_exists.insert(key.to_string());
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .map(|b| b.contains_key(key))
            .unwrap_or(false)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.data.clone())
    }

    /// Current hold flag of an object, if it exists.
    pub fn hold(&self, bucket: &str, key: &str) -> Option<bool> {
        let buckets = self.buckets.lock().unwrap();
        buckets.get(bucket).and_then(|b| b.get(key)).map(|o| o.hold)
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of mutating calls (write, copy, delete, set_hold)
    /// issued against this store.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<StagedObject>> {
        let buckets = self.buckets.lock().unwrap();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| AggError::NotFound(format!("bucket '{}'", bucket)))?;

        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| StagedObject {
                key: key.clone(),
                size: obj.data.len() as i64,
                last_modified: Some(obj.last_modified),
            })
            .collect())
    }

    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        {
            let mut faults = self.faults.lock().unwrap();
            if faults.unreadable.contains(key) {
                return Err(AggError::Storage(format!("injected read failure: {}", key)));
            }
            if let Some(remaining) = faults.transient_read_failures.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AggError::Storage(format!(
                        "injected transient read failure: {}",
                        key
                    )));
                }
            }
        }

        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.data.clone())
            .ok_or_else(|| AggError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn write(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        _content_type: Option<String>,
    ) -> Result<UploadResult> {
        self.mutations.fetch_add(1, Ordering::SeqCst);

        let size = data.len() as i64;
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .get_mut(bucket)
            .ok_or_else(|| AggError::NotFound(format!("bucket '{}'", bucket)))?
            .insert(
                key.to_string(),
                StoredObject {
                    data,
                    hold: false,
                    last_modified: Utc::now(),
                },
            );

        Ok(UploadResult {
            key: key.to_string(),
            checksum: String::new(),
            size,
        })
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);

        {
            let faults = self.faults.lock().unwrap();
            if faults.fail_copies {
                return Err(AggError::Storage("injected copy failure".to_string()));
            }
        }

        let mut buckets = self.buckets.lock().unwrap();
        let source = buckets
            .get(src_bucket)
            .and_then(|b| b.get(src_key))
            .cloned()
            .ok_or_else(|| AggError::NotFound(format!("{}/{}", src_bucket, src_key)))?;

        buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| AggError::NotFound(format!("bucket '{}'", dst_bucket)))?
            .insert(
                dst_key.to_string(),
                StoredObject {
                    hold: false,
                    ..source
                },
            );

        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        {
            let faults = self.faults.lock().unwrap();
            if faults.suppressed_from_exists.contains(key) {
                return Ok(false);
            }
        }

        Ok(self.contains(bucket, key))
    }

    async fn delete(&self, bucket: &str, key: &str, _deadline: Duration) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);

        {
            let faults = self.faults.lock().unwrap();
            if faults.undeletable.contains(key) {
                return Err(AggError::Storage(format!(
                    "injected delete failure: {}",
                    key
                )));
            }
        }

        let mut buckets = self.buckets.lock().unwrap();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| AggError::NotFound(format!("bucket '{}'", bucket)))?;

        match objects.get(key) {
            Some(obj) if obj.hold => Err(AggError::Storage(format!(
                "object '{}' is under retention hold",
                key
            ))),
            Some(_) => {
                objects.remove(key);
                Ok(())
            },
            None => Err(AggError::NotFound(format!("{}/{}", bucket, key))),
        }
    }

    async fn set_hold(&self, bucket: &str, key: &str, held: bool) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);

        {
            let faults = self.faults.lock().unwrap();
            if faults.hold_patch_fails.contains(key) {
                return Err(AggError::Storage(format!(
                    "injected hold patch failure: {}",
                    key
                )));
            }
        }

        let mut buckets = self.buckets.lock().unwrap();
        let obj = buckets
            .get_mut(bucket)
            .and_then(|b| b.get_mut(key))
            .ok_or_else(|| AggError::NotFound(format!("{}/{}", bucket, key)))?;

        obj.hold = held;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hold_blocks_deletion() {
        let store = MemoryStore::new();
        store.seed_object("b", "k", b"data", true);

        let err = store.delete("b", "k", Duration::from_secs(1)).await;
        assert!(err.is_err());
        assert!(store.contains("b", "k"));

        store.set_hold("b", "k", false).await.unwrap();
        store.delete("b", "k", Duration::from_secs(1)).await.unwrap();
        assert!(!store.contains("b", "k"));
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let store = MemoryStore::new();
        store.seed_object("b", "2024/01/15/a.json", b"1", false);
        store.seed_object("b", "2024/01/16/b.json", b"2", false);

        let listed = store.list("b", "2024/01/15").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "2024/01/15/a.json");
    }

    #[tokio::test]
    async fn test_list_missing_bucket_is_not_found() {
        let store = MemoryStore::new();
        let err = store.list("nope", "").await.unwrap_err();
        assert!(matches!(err, AggError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_transient_read_failures_expire() {
        let store = MemoryStore::new();
        store.seed_object("b", "k", b"payload", false);
        store.fail_reads("k", 2);

        assert!(store.read("b", "k").await.is_err());
        assert!(store.read("b", "k").await.is_err());
        assert_eq!(store.read("b", "k").await.unwrap(), b"payload");
    }
}
