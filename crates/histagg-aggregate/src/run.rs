//! One aggregation run
//!
//! An [`AggregationRun`] is the unit of work for one (topic, process date)
//! pair: list the day's staged objects, fold them into a container with
//! per-entry rollback, commit the container durably, then retire the
//! folded sources. All mutable run state (processed/failed lists, the JSON
//! accumulator) is owned by the run value, so concurrent runs for distinct
//! topics share nothing.

use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use histagg_common::Result;

use crate::archive::ArchiveBuilder;
use crate::commit::CommitPipeline;
use crate::fetch::{BlobFetcher, FetchedBlob};
use crate::naming::RunNaming;
use crate::retire::RetirementManager;
use crate::storage::ObjectStore;

/// An object whose bytes are fully written into the container.
///
/// Only these (plus the staging archive itself) may be retired.
#[derive(Debug, Clone)]
pub struct ProcessedEntry {
    pub source_key: String,
    /// Name the payload carries inside the container; folded JSON payloads
    /// share the synthetic aggregated entry's name
    pub entry_name: String,
    pub size: u64,
}

/// An object excluded from this run; it stays in staging untouched and is
/// picked up again by the next run.
#[derive(Debug, Clone)]
pub struct FailedEntry {
    pub source_key: String,
    pub reason: String,
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Zero staged objects for the date prefix; nothing was written
    Empty,
    /// Listing held only prior-run archives and/or failed objects; no
    /// archive was produced
    NothingToFold { skipped: usize, failed: usize },
    /// Archive committed and verified; sources retired
    Committed {
        archive_key: String,
        entries: usize,
        failed_objects: usize,
        retired: usize,
        failed_retirements: usize,
    },
}

/// Aggregates one topic's staged backlog for one day.
pub struct AggregationRun<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    naming: RunNaming,
    run_timestamp: i64,
    fetcher: BlobFetcher,
    committer: CommitPipeline,
    retirer: RetirementManager,
    processed: Vec<ProcessedEntry>,
    failed: Vec<FailedEntry>,
    /// Rows from payloads that parsed as JSON arrays, folded into one
    /// synthetic entry at the end
    json_rows: Vec<Value>,
}

impl<'a, S: ObjectStore + ?Sized> AggregationRun<'a, S> {
    pub fn new(
        store: &'a S,
        naming: RunNaming,
        run_timestamp: i64,
        delete_deadline: Duration,
    ) -> Self {
        Self {
            store,
            naming,
            run_timestamp,
            fetcher: BlobFetcher::default(),
            committer: CommitPipeline::default(),
            retirer: RetirementManager::new(Default::default(), delete_deadline),
            processed: Vec::new(),
            failed: Vec::new(),
            json_rows: Vec::new(),
        }
    }

    /// Execute the run to a terminal state.
    ///
    /// Errors returned here are run-fatal (`NotFound`, `CommitFailed`,
    /// `VerificationFailed`, or an unusable spill area); in every such
    /// case no source object has been retired.
    pub async fn execute(mut self) -> Result<RunOutcome> {
        let objects = self
            .store
            .list(&self.naming.staging_bucket, &self.naming.date_prefix)
            .await?;

        if objects.is_empty() {
            info!(
                "Found no backup files under '{}/{}'",
                self.naming.staging_bucket, self.naming.date_prefix
            );
            return Ok(RunOutcome::Empty);
        }

        let total = objects.len();
        let mut builder = ArchiveBuilder::new(self.run_timestamp as u64)?;
        let mut skipped = 0usize;

        for (index, object) in objects.iter().enumerate() {
            let position = index + 1;

            // A prior run's output re-listed by the same date prefix must
            // not be folded into a new archive.
            if self.naming.is_own_archive(&object.key) {
                info!("Skipping... {}/{} ({})", position, total, object.key);
                skipped += 1;
                continue;
            }

            let checkpoint = builder.checkpoint()?;

            match self.fold_object(&mut builder, &object.key, position, total).await {
                Ok(()) => {},
                Err(reason) => {
                    warn!("Skipping... {}/{} ({}): {}", position, total, object.key, reason);
                    builder.rollback(checkpoint)?;
                    self.failed.push(FailedEntry {
                        source_key: object.key.clone(),
                        reason,
                    });
                },
            }
        }

        if !self.json_rows.is_empty() {
            let aggregated = serde_json::to_vec(&self.json_rows)?;
            info!(
                "Aggregating... json/{} ({})",
                total, self.naming.json_entry_name
            );
            builder.append(&self.naming.json_entry_name, &aggregated)?;
        }

        if self.processed.is_empty() {
            info!(
                "Nothing new to fold for '{}' ({} skipped, {} failed)",
                self.naming.staging_bucket,
                skipped,
                self.failed.len()
            );
            return Ok(RunOutcome::NothingToFold {
                skipped,
                failed: self.failed.len(),
            });
        }

        let entries = builder.entry_count();
        let spill = builder.finish()?;

        // Retirement is gated entirely on a verified commit.
        let receipt = self.committer.commit(self.store, &self.naming, spill).await?;

        let mut retire_keys: Vec<String> =
            self.processed.iter().map(|p| p.source_key.clone()).collect();
        retire_keys.push(receipt.archive_key.clone());

        let report = self
            .retirer
            .retire_all(self.store, &self.naming.staging_bucket, &retire_keys)
            .await;

        Ok(RunOutcome::Committed {
            archive_key: receipt.archive_key,
            entries,
            failed_objects: self.failed.len(),
            retired: report.retired.len(),
            failed_retirements: report.failed.len(),
        })
    }

    /// Fetch one object and fold it into the container (or the JSON
    /// accumulator). Any `Err` leaves the container to be rolled back to
    /// the caller's checkpoint.
    async fn fold_object(
        &mut self,
        builder: &mut ArchiveBuilder,
        key: &str,
        position: usize,
        total: usize,
    ) -> std::result::Result<(), String> {
        let FetchedBlob { data, name } = self
            .fetcher
            .fetch(self.store, &self.naming.staging_bucket, key)
            .await
            .map_err(|e| e.to_string())?;

        if data.is_empty() {
            return Err("empty payload".to_string());
        }

        // Payloads that parse as JSON arrays are folded into the single
        // aggregated entry instead of carrying their own container entry.
        if let Ok(rows) = serde_json::from_slice::<Vec<Value>>(&data) {
            info!("Extending... {}/{} ({})", position, total, key);
            self.json_rows.extend(rows);
            self.processed.push(ProcessedEntry {
                source_key: key.to_string(),
                entry_name: self.naming.json_entry_name.clone(),
                size: data.len() as u64,
            });
            return Ok(());
        }

        info!("Aggregating... {}/{} ({})", position, total, key);

        let entry_name = basename(&name);
        builder
            .append(entry_name, &data)
            .map_err(|e| e.to_string())?;

        self.processed.push(ProcessedEntry {
            source_key: key.to_string(),
            entry_name: entry_name.to_string(),
            size: data.len() as u64,
        });

        Ok(())
    }
}

/// Final path component of a key; container entries are named without
/// their date-prefix directories.
fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_basename() {
        assert_eq!(basename("2024/01/15/event-0001.json"), "event-0001.json");
        assert_eq!(basename("flat.json"), "flat.json");
    }
}
