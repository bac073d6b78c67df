//! `DownloaderConfig`: the process-wide knobs from `SPEC_FULL.md` §6.5.
//! Loading these from a config file/CLI flags is out of scope (§1) — only
//! the struct and its defaults are carried.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-wide configuration for [`crate::downloader::BookDownloader`].
///
/// `Default` reproduces the original CLI's config-loader defaults, per
/// `SPEC_FULL.md` §6.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Number of concurrent fetch/parse worker tasks.
    pub workers: usize,
    /// Inter-request pacing applied by each worker between chapters.
    pub request_interval: Duration,
    /// Maximum retries per chapter, beyond the first attempt.
    pub retry_times: u32,
    /// Base for exponential backoff between retries, in seconds.
    pub backoff_factor: f64,
    /// Flush threshold per storage bucket.
    pub storage_batch_size: usize,
    /// Skip chapters where `storage.needs_refetch(cid) == false`.
    pub skip_existing: bool,
    /// Process-wide token-bucket rate, in requests/second. `0.0` disables it.
    pub max_rps: f64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            request_interval: Duration::from_millis(500),
            retry_times: 3,
            backoff_factor: 2.0,
            storage_batch_size: 32,
            skip_existing: true,
            max_rps: 0.0,
        }
    }
}

impl DownloaderConfig {
    /// Bounded-channel capacity for both `cid_queue` and `save_queue`:
    /// `2 * workers`, per `SPEC_FULL.md` §4.2.3.
    pub fn queue_capacity(&self) -> usize {
        (2 * self.workers).max(1)
    }
}
