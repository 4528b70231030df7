//! Blob fetcher
//!
//! Resolves one staged object into archive-ready bytes. Objects in the
//! recognized compressed envelope format (`.archive.gz`) are decompressed
//! in full and their logical name rewritten to the decompressed `.json`
//! suffix; everything else passes through unchanged. Reads are retried
//! under the fixed network policy before a failure is surfaced.
//!
//! Fetching has no side effects on storage.

use flate2::read::GzDecoder;
use std::io::Read;
use tracing::debug;

use histagg_common::retry::RetryPolicy;
use histagg_common::{AggError, Result};

use crate::storage::ObjectStore;

/// Suffix of the recognized compressed envelope
const ENVELOPE_SUFFIX: &str = ".archive.gz";

/// Suffix the envelope's logical name is rewritten to
const DECOMPRESSED_SUFFIX: &str = ".json";

/// How a staged object's payload is encoded, judged from its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobEncoding {
    Raw,
    GzipEnvelope,
}

impl BlobEncoding {
    pub fn from_key(key: &str) -> Self {
        if key.ends_with(ENVELOPE_SUFFIX) {
            BlobEncoding::GzipEnvelope
        } else {
            BlobEncoding::Raw
        }
    }
}

/// One staged object resolved to archive-ready bytes.
#[derive(Debug)]
pub struct FetchedBlob {
    /// Decompressed (or passthrough) payload
    pub data: Vec<u8>,
    /// Logical name, with the envelope suffix rewritten when applicable
    pub name: String,
}

/// Fetches staged objects, transparently unwrapping the compressed
/// envelope.
pub struct BlobFetcher {
    retry: RetryPolicy,
}

impl Default for BlobFetcher {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
        }
    }
}

impl BlobFetcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Fetch one object from `bucket` and return its archive-ready form.
    pub async fn fetch<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        bucket: &str,
        key: &str,
    ) -> Result<FetchedBlob> {
        let raw = self
            .retry
            .run("read", || store.read(bucket, key))
            .await
            .map_err(|e| AggError::FetchFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        match BlobEncoding::from_key(key) {
            BlobEncoding::Raw => Ok(FetchedBlob {
                data: raw,
                name: key.to_string(),
            }),
            BlobEncoding::GzipEnvelope => {
                let data = decompress_gzip(&raw).map_err(|e| AggError::FetchFailed {
                    key: key.to_string(),
                    reason: format!("envelope decompression failed: {}", e),
                })?;

                let name = format!(
                    "{}{}",
                    &key[..key.len() - ENVELOPE_SUFFIX.len()],
                    DECOMPRESSED_SUFFIX
                );

                debug!(
                    "Unwrapped envelope {} -> {} ({} -> {} bytes)",
                    key,
                    name,
                    raw.len(),
                    data.len()
                );

                Ok(FetchedBlob { data, name })
            },
        }
    }
}

/// Decompress gzip-compressed data.
fn decompress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}
