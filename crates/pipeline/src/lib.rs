//! The asynchronous download pipeline: a producer/worker/storage staged
//! pipeline that drives one book's chapters to completion with bounded
//! concurrency, retries, pacing, cancellation, and batched persistence.
//! See `SPEC_FULL.md` §4.2.

mod config;
mod downloader;
mod error;
mod fetch;
mod progress;
mod queue;

pub use config::DownloaderConfig;
pub use downloader::{BookDownloader, DownloadOutcome};
pub use error::{PipelineError, Result};
pub use fetch::{cache_chapter_images, fetch_chapter};
pub use progress::{NoopProgressSink, ProgressSink};
