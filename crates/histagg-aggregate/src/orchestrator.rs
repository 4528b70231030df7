//! Aggregation orchestrator
//!
//! Drives one aggregation run per topic for a given process date. Topics
//! are fully independent units of work on disjoint bucket prefixes, so a
//! failure anywhere in one topic's run is logged and the orchestrator
//! moves on to the next.

use chrono::NaiveDate;
use std::time::Duration;
use tracing::{error, info};

use crate::naming::RunNaming;
use crate::run::{AggregationRun, RunOutcome};
use crate::storage::ObjectStore;

/// Parameters shared by every run of one invocation.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// The day whose staged objects are aggregated
    pub process_date: NaiveDate,
    /// Epoch seconds stamped into archive keys and entry mtimes
    pub run_timestamp: i64,
    /// Per-object delete budget during retirement
    pub delete_deadline: Duration,
}

/// Totals across one invocation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AggregateSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Sequences aggregation runs across topics.
pub struct Orchestrator<S: ObjectStore> {
    store: S,
    config: OrchestratorConfig,
}

impl<S: ObjectStore> Orchestrator<S> {
    pub fn new(store: S, config: OrchestratorConfig) -> Self {
        Self { store, config }
    }

    /// Aggregate every topic, isolating per-topic failures.
    pub async fn run(&self, topics: &[String]) -> AggregateSummary {
        info!("Found {} topics to aggregate", topics.len());

        let mut summary = AggregateSummary::default();

        for topic in topics {
            info!("Starting aggregation for topic '{}'", topic);

            let naming = RunNaming::new(
                topic,
                self.config.process_date,
                self.config.run_timestamp,
            );
            let run = AggregationRun::new(
                &self.store,
                naming,
                self.config.run_timestamp,
                self.config.delete_deadline,
            );

            match run.execute().await {
                Ok(outcome) => {
                    log_outcome(topic, &outcome);
                    summary.succeeded += 1;
                },
                Err(e) => {
                    error!("Failed aggregation for topic '{}': {}", topic, e);
                    summary.failed += 1;
                },
            }
        }

        info!(
            "Aggregation cycle completed: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        );

        summary
    }
}

fn log_outcome(topic: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Empty => {
            info!("Finished aggregation for topic '{}': nothing staged", topic);
        },
        RunOutcome::NothingToFold { skipped, failed } => {
            info!(
                "Finished aggregation for topic '{}': nothing new to fold ({} skipped, {} failed)",
                topic, skipped, failed
            );
        },
        RunOutcome::Committed {
            archive_key,
            entries,
            failed_objects,
            retired,
            failed_retirements,
        } => {
            info!(
                "Finished aggregation for topic '{}': archive '{}' ({} entries, {} objects failed), {} retired, {} left in place",
                topic, archive_key, entries, failed_objects, retired, failed_retirements
            );
        },
    }
}
