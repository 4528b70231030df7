//! Histagg Aggregate Library
//!
//! Periodically folds a topic's staged per-event backup objects into one
//! compacted archive, commits the archive durably to a staging and a
//! backup bucket, verifies the backup copy, and only then retires the
//! source objects.
//!
//! The ordering invariant the whole crate is built around: **no source
//! object is deleted unless the archive that contains it has been
//! committed to both locations and its presence in the backup location
//! has been independently re-verified.**
//!
//! # Example
//!
//! ```no_run
//! use histagg_aggregate::orchestrator::{Orchestrator, OrchestratorConfig};
//! use histagg_aggregate::storage::{config::StorageConfig, S3Store};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = S3Store::new(StorageConfig::from_env()?).await?;
//!     let config = OrchestratorConfig {
//!         process_date: chrono::Utc::now().date_naive().pred_opt().unwrap(),
//!         run_timestamp: chrono::Utc::now().timestamp(),
//!         delete_deadline: Duration::from_secs(60),
//!     };
//!
//!     let summary = Orchestrator::new(store, config)
//!         .run(&["payments".to_string()])
//!         .await;
//!     println!("{} topics aggregated", summary.succeeded);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod catalog;
pub mod commit;
pub mod fetch;
pub mod naming;
pub mod orchestrator;
pub mod retire;
pub mod run;
pub mod storage;
