//! Data catalog loading
//!
//! The catalog is a DCAT-style JSON document enumerating datasets with
//! distributions; every distribution with format `"topic"` names one topic
//! whose staging bucket gets aggregated.

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use histagg_common::{AggError, Result};

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    dataset: Vec<Dataset>,
}

#[derive(Debug, Deserialize)]
struct Dataset {
    #[serde(default)]
    distribution: Vec<Distribution>,
}

#[derive(Debug, Deserialize)]
struct Distribution {
    format: Option<String>,
    title: Option<String>,
}

/// Extract topic names from catalog JSON.
pub fn topic_names(catalog_json: &str) -> Result<Vec<String>> {
    let catalog: Catalog = serde_json::from_str(catalog_json)?;

    let topics: Vec<String> = catalog
        .dataset
        .iter()
        .flat_map(|d| &d.distribution)
        .filter(|d| d.format.as_deref() == Some("topic"))
        .filter_map(|d| d.title.clone())
        .collect();

    debug!("Catalog yielded {} topics", topics.len());

    Ok(topics)
}

/// Load topic names from a catalog file on disk.
pub fn load_topics(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        AggError::Config(format!("failed to read catalog '{}': {}", path.display(), e))
    })?;
    topic_names(&contents)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_extracted_from_catalog() {
        let json = r#"{
            "dataset": [
                {
                    "distribution": [
                        {"format": "topic", "title": "payments"},
                        {"format": "csv", "title": "payments-export"}
                    ]
                },
                {
                    "distribution": [
                        {"format": "topic", "title": "orders"}
                    ]
                }
            ]
        }"#;

        let topics = topic_names(json).unwrap();
        assert_eq!(topics, vec!["payments", "orders"]);
    }

    #[test]
    fn test_empty_catalog_yields_no_topics() {
        assert!(topic_names("{}").unwrap().is_empty());
        assert!(topic_names(r#"{"dataset": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_distribution_without_title_is_skipped() {
        let json = r#"{"dataset": [{"distribution": [{"format": "topic"}]}]}"#;
        assert!(topic_names(json).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_catalog_is_an_error() {
        assert!(topic_names("not json").is_err());
    }
}
