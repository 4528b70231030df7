//! Retirement manager
//!
//! Removes source objects (and the staging copy of the archive) once the
//! commit pipeline has verified the backup. Deletion on the object store is
//! not transactional, so each key goes through an explicit compensating
//! sequence:
//!
//! `Held -> Unheld -> Deleted`, or `Unheld -> Held` again if the delete
//! fails — an object must never be left unheld-but-undeleted where a
//! garbage-collection policy could reap it.
//!
//! Per-key failures are isolated; one stubborn object does not block the
//! retirement of the rest.

use std::time::Duration;
use tracing::{error, info, warn};

use histagg_common::retry::RetryPolicy;
use histagg_common::{AggError, Result};

use crate::storage::ObjectStore;

/// Hold transition applied to one key during retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldTransition {
    /// Hold cleared, delete succeeded
    Deleted,
    /// Hold patch failed; object untouched and still held
    StillHeld,
    /// Delete failed; hold restored
    Restored,
}

/// Outcome of a retirement pass.
#[derive(Debug, Default)]
pub struct RetirementReport {
    /// Keys whose objects were deleted
    pub retired: Vec<String>,
    /// Keys left in place (hold intact or restored)
    pub failed: Vec<String>,
}

/// Retires keys from a bucket under the hold-clear / delete / hold-restore
/// protocol.
pub struct RetirementManager {
    retry: RetryPolicy,
    /// Wall-clock budget for each delete
    delete_deadline: Duration,
}

impl Default for RetirementManager {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            delete_deadline: Duration::from_secs(60),
        }
    }
}

impl RetirementManager {
    pub fn new(retry: RetryPolicy, delete_deadline: Duration) -> Self {
        Self {
            retry,
            delete_deadline,
        }
    }

    /// Retire every key in order, isolating per-key failures.
    pub async fn retire_all<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        bucket: &str,
        keys: &[String],
    ) -> RetirementReport {
        info!("Retiring {} obsolete objects from '{}'", keys.len(), bucket);

        let mut report = RetirementReport::default();

        for key in keys {
            match self.retire_one(store, bucket, key).await {
                Ok(HoldTransition::Deleted) => report.retired.push(key.clone()),
                Ok(transition) => {
                    warn!("Object '{}' not retired ({:?})", key, transition);
                    report.failed.push(key.clone());
                },
                Err(e) => {
                    error!("Retirement of '{}' failed: {}", key, e);
                    report.failed.push(key.clone());
                },
            }
        }

        info!(
            "Retirement finished: {} deleted, {} left in place",
            report.retired.len(),
            report.failed.len()
        );

        report
    }

    async fn retire_one<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        bucket: &str,
        key: &str,
    ) -> Result<HoldTransition> {
        // Held -> Unheld. Leaving the hold in place is the safe default,
        // so a failed patch skips deletion entirely.
        if let Err(e) = self
            .retry
            .run("clear hold", || store.set_hold(bucket, key, false))
            .await
        {
            warn!(
                "Failed to clear hold on '{}', skipping deletion: {}",
                key, e
            );
            return Ok(HoldTransition::StillHeld);
        }

        // Unheld -> Deleted. The deadline lives inside the gateway call;
        // delete latency is less predictable than read/write latency.
        match store.delete(bucket, key, self.delete_deadline).await {
            Ok(()) => Ok(HoldTransition::Deleted),
            Err(delete_err) => {
                warn!(
                    "Failed to delete '{}', restoring hold: {}",
                    key, delete_err
                );

                // Unheld -> Held. If even the restore fails, surface it:
                // the object is now in the state this protocol exists to
                // prevent.
                if let Err(restore_err) = self
                    .retry
                    .run("restore hold", || store.set_hold(bucket, key, true))
                    .await
                {
                    error!(
                        "Failed to restore hold on '{}' after delete failure: {}",
                        key, restore_err
                    );
                    return Err(AggError::RetirementFailed {
                        key: key.to_string(),
                        reason: format!(
                            "delete failed ({}) and hold restore failed ({})",
                            delete_err, restore_err
                        ),
                    });
                }

                Ok(HoldTransition::Restored)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    fn manager() -> RetirementManager {
        RetirementManager::default()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_held_objects_are_unheld_and_deleted() {
        let store = MemoryStore::new();
        store.seed_object("b", "a.json", b"1", true);
        store.seed_object("b", "b.json", b"2", true);

        let report = manager().retire_all(&store, "b", &keys(&["a.json", "b.json"])).await;

        assert_eq!(report.retired, vec!["a.json", "b.json"]);
        assert!(report.failed.is_empty());
        assert!(!store.contains("b", "a.json"));
        assert!(!store.contains("b", "b.json"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_restores_hold() {
        let store = MemoryStore::new();
        store.seed_object("b", "stuck.json", b"1", true);
        store.make_undeletable("stuck.json");

        let report = manager().retire_all(&store, "b", &keys(&["stuck.json"])).await;

        assert!(report.retired.is_empty());
        assert_eq!(report.failed, vec!["stuck.json"]);
        // The object survived with its hold restored
        assert_eq!(store.hold("b", "stuck.json"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_patch_failure_skips_deletion() {
        let store = MemoryStore::new();
        store.seed_object("b", "pinned.json", b"1", true);
        store.fail_hold_patch("pinned.json");

        let report = manager().retire_all(&store, "b", &keys(&["pinned.json"])).await;

        assert!(report.retired.is_empty());
        assert_eq!(report.failed, vec!["pinned.json"]);
        assert!(store.contains("b", "pinned.json"));
        assert_eq!(store.hold("b", "pinned.json"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_key_failures_are_isolated() {
        let store = MemoryStore::new();
        store.seed_object("b", "good-1.json", b"1", true);
        store.seed_object("b", "stuck.json", b"2", true);
        store.seed_object("b", "good-2.json", b"3", true);
        store.make_undeletable("stuck.json");

        let report = manager()
            .retire_all(&store, "b", &keys(&["good-1.json", "stuck.json", "good-2.json"]))
            .await;

        assert_eq!(report.retired, vec!["good-1.json", "good-2.json"]);
        assert_eq!(report.failed, vec!["stuck.json"]);
    }
}
