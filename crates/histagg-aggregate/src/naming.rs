//! Bucket and key naming conventions
//!
//! The names produced here are consumed by existing downstream tooling and
//! must not drift:
//!
//! - staging bucket: `<topic>-hst-sa-stg`
//! - backup bucket: `<topic>-history-stg`
//! - date prefix: `YYYY/MM/DD` of the process date
//! - archive key: `<date-prefix>/<staging-bucket>_<YYYYMMDD>_<run-ts>.tar.gz`
//! - aggregated JSON entry: `<staging-bucket>_<YYYYMMDD>_<run-ts>.json`

use chrono::NaiveDate;

/// Content type of the uploaded archive object.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

/// All names derived from one (topic, process date, run timestamp) triple.
///
/// The run timestamp makes the archive key unique across repeated or
/// concurrent runs for the same day; the date-stamped stem (without the
/// timestamp) is what lets a later run recognize and skip an earlier run's
/// output.
#[derive(Debug, Clone)]
pub struct RunNaming {
    pub topic: String,
    pub staging_bucket: String,
    pub backup_bucket: String,
    pub date_prefix: String,
    /// `<staging-bucket>_<YYYYMMDD>` — shared by every run for this day
    pub archive_stem: String,
    /// Full key of this run's archive within either bucket
    pub archive_key: String,
    /// Entry name for the aggregated JSON payload inside the archive
    pub json_entry_name: String,
}

impl RunNaming {
    pub fn new(topic: &str, process_date: NaiveDate, run_timestamp: i64) -> Self {
        let staging_bucket = format!("{}-hst-sa-stg", topic);
        let backup_bucket = format!("{}-history-stg", topic);
        let date_prefix = process_date.format("%Y/%m/%d").to_string();
        let archive_stem = format!("{}_{}", staging_bucket, process_date.format("%Y%m%d"));
        let archive_key = format!("{}/{}_{}.tar.gz", date_prefix, archive_stem, run_timestamp);
        let json_entry_name = format!("{}_{}.json", archive_stem, run_timestamp);

        Self {
            topic: topic.to_string(),
            staging_bucket,
            backup_bucket,
            date_prefix,
            archive_stem,
            archive_key,
            json_entry_name,
        }
    }

    /// Whether a listed key is a prior (or this) run's archive output for
    /// the same day, which must never be folded into a new archive.
    pub fn is_own_archive(&self, key: &str) -> bool {
        key.contains(&self.archive_stem)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn naming() -> RunNaming {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        RunNaming::new("payments", date, 1705363200)
    }

    #[test]
    fn test_bucket_names() {
        let n = naming();
        assert_eq!(n.staging_bucket, "payments-hst-sa-stg");
        assert_eq!(n.backup_bucket, "payments-history-stg");
    }

    #[test]
    fn test_date_prefix() {
        assert_eq!(naming().date_prefix, "2024/01/15");
    }

    #[test]
    fn test_archive_key() {
        assert_eq!(
            naming().archive_key,
            "2024/01/15/payments-hst-sa-stg_20240115_1705363200.tar.gz"
        );
    }

    #[test]
    fn test_json_entry_name() {
        assert_eq!(
            naming().json_entry_name,
            "payments-hst-sa-stg_20240115_1705363200.json"
        );
    }

    #[test]
    fn test_own_archive_detection_spans_runs() {
        let n = naming();
        // A different run timestamp for the same day still matches
        assert!(n.is_own_archive(
            "2024/01/15/payments-hst-sa-stg_20240115_1705000000.tar.gz"
        ));
        assert!(!n.is_own_archive("2024/01/15/event-000123.archive.gz"));
        // Same topic, different day
        assert!(!n.is_own_archive(
            "2024/01/14/payments-hst-sa-stg_20240114_1705000000.tar.gz"
        ));
    }

    #[test]
    fn test_single_digit_dates_are_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let n = RunNaming::new("t", date, 1);
        assert_eq!(n.date_prefix, "2024/03/05");
        assert_eq!(n.archive_stem, "t-hst-sa-stg_20240305");
    }
}
