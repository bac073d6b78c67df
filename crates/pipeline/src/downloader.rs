//! `BookDownloader`: the producer/worker/storage staged pipeline for one
//! book (`SPEC_FULL.md` §4.2). This is the core of the crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quelle_core::{BookConfig, BookId, BookInfo, Chapter, ChapterId, DownloaderHooks, Fetcher, Parser, SiteKey};
use quelle_retry::{request_pacing_sleep, TokenBucketRateLimiter};
use quelle_storage::{ChapterStorage, SqliteChapterStorage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::DownloaderConfig;
use crate::error::Result;
use crate::fetch::{cache_chapter_images, fetch_chapter};
use crate::progress::{ProgressSink, ProgressTracker};
use crate::queue::{CidMessage, SaveMessage, SharedReceiver};

const STORAGE_FILENAME: &str = "chapter.raw.sqlite";
const MEDIA_DIRNAME: &str = "medias";
/// Grace period for the storage task on externally-forced cancellation
/// (`SPEC_FULL.md` §5/§9). The cooperative-cancel path never hits this —
/// `STOP` tokens guarantee the storage task finishes on its own.
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Outcome of one `download_book` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub done: usize,
    pub total: usize,
    pub cancelled: bool,
}

/// Orchestrates one book's download: opens its `ChapterStorage`, computes
/// the plan, and drives the producer/worker/storage tasks to completion.
pub struct BookDownloader {
    book_id: BookId,
    config: DownloaderConfig,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    hooks: Arc<dyn DownloaderHooks>,
    rate_limiter: Arc<TokenBucketRateLimiter>,
    storage: Arc<dyn ChapterStorage>,
    media_dir: PathBuf,
}

impl BookDownloader {
    /// Opens `raw_data_dir/<site>/<book_id>/chapter.raw.sqlite`, creating the
    /// directory tree if needed. This is the one fatal-setup point in the
    /// pipeline (`SPEC_FULL.md` §4.2.7) — every error after this point is
    /// non-fatal and only ever shows up as a log line.
    #[instrument(skip(fetcher, parser, hooks, rate_limiter), fields(site = %site, book_id = %book_id))]
    pub async fn open(
        raw_data_dir: impl AsRef<Path>,
        site: &SiteKey,
        book_id: BookId,
        config: DownloaderConfig,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn Parser>,
        hooks: Arc<dyn DownloaderHooks>,
        rate_limiter: Arc<TokenBucketRateLimiter>,
    ) -> Result<Self> {
        let book_dir = raw_data_dir.as_ref().join(site.as_str()).join(book_id.as_str());
        let storage = SqliteChapterStorage::open(&book_dir, STORAGE_FILENAME).await?;
        Ok(Self {
            book_id,
            config,
            fetcher,
            parser,
            hooks,
            rate_limiter,
            storage: Arc::new(storage),
            media_dir: book_dir.join(MEDIA_DIRNAME),
        })
    }

    /// The `ChapterStorage` handle this downloader owns, exposed so a
    /// caller can run `ChapterIdRepairer` against it before the pipeline
    /// starts (`SPEC_FULL.md` §3 Ownership: "the repair step borrows it
    /// before the pipeline starts").
    pub fn storage(&self) -> Arc<dyn ChapterStorage> {
        self.storage.clone()
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    pub async fn close(&self) -> Result<()> {
        Ok(self.storage.close().await?)
    }

    /// Download every chapter `book_config` selects out of `book_info`'s
    /// catalog. Returns once the producer, all workers, and the storage
    /// task have finished — see `SPEC_FULL.md` §4.2.3.
    #[instrument(skip_all, fields(book_id = %self.book_id))]
    pub async fn download_book(
        &self,
        book_info: &BookInfo,
        book_config: &BookConfig,
        cancel: CancellationToken,
        progress: Arc<dyn ProgressSink>,
    ) -> DownloadOutcome {
        let plan = compute_plan(book_info, book_config);
        if plan.is_empty() {
            return DownloadOutcome {
                done: 0,
                total: 0,
                cancelled: cancel.is_cancelled(),
            };
        }

        let total = plan.len();
        let tracker = Arc::new(ProgressTracker::new(total, progress));
        let capacity = self.config.queue_capacity();

        let (cid_tx, cid_rx) = mpsc::channel(capacity);
        let (save_tx, save_rx) = mpsc::channel::<SaveMessage>(capacity);
        let cid_rx = SharedReceiver::new(cid_rx);

        let producer = tokio::spawn(run_producer(
            plan,
            self.storage.clone(),
            self.config.skip_existing,
            self.config.workers,
            cid_tx,
            tracker.clone(),
            cancel.clone(),
        ));

        let mut workers = Vec::with_capacity(self.config.workers);
        for _ in 0..self.config.workers {
            workers.push(tokio::spawn(run_worker(
                self.book_id.clone(),
                self.fetcher.clone(),
                self.parser.clone(),
                self.hooks.clone(),
                self.rate_limiter.clone(),
                self.media_dir.clone(),
                cid_rx.clone(),
                save_tx.clone(),
                self.config.retry_times,
                self.config.backoff_factor,
                self.config.request_interval,
                cancel.clone(),
            )));
        }
        drop(save_tx);

        let storage_handle = tokio::spawn(run_storage(
            self.storage.clone(),
            self.hooks.clone(),
            save_rx,
            self.config.workers,
            self.config.storage_batch_size,
            tracker.clone(),
            cancel.clone(),
        ));

        if let Err(err) = producer.await {
            error!(%err, "producer task panicked");
        }
        for worker in workers {
            if let Err(err) = worker.await {
                error!(%err, "worker task panicked");
            }
        }

        if cancel.is_cancelled() {
            match tokio::time::timeout(CANCEL_GRACE_PERIOD, storage_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(%err, "storage task panicked"),
                Err(_) => warn!("storage task did not finish within the cancellation grace period, abandoning"),
            }
        } else if let Err(err) = storage_handle.await {
            error!(%err, "storage task panicked");
        }

        let done = tracker.current().await;
        if cancel.is_cancelled() {
            info!(done, total, "book cancelled: flushed {done}/{total}");
        } else {
            info!(done, total, "book completed");
        }

        DownloadOutcome {
            done,
            total,
            cancelled: cancel.is_cancelled(),
        }
    }
}

/// Flattens `book_info`'s catalog into the ordered, range-restricted,
/// ignore-filtered chapter plan (`SPEC_FULL.md` §4.2.2).
fn compute_plan(book_info: &BookInfo, book_config: &BookConfig) -> Vec<ChapterId> {
    let refs: Vec<_> = book_info.chapter_refs().collect();

    let start_idx = book_config
        .start_id
        .as_ref()
        .and_then(|start| refs.iter().position(|r| r.id() == Some(start)));
    let end_idx = book_config
        .end_id
        .as_ref()
        .and_then(|end| refs.iter().position(|r| r.id() == Some(end)));

    refs.iter()
        .enumerate()
        .filter(|(i, _)| start_idx.map_or(true, |s| *i >= s))
        .filter(|(i, _)| end_idx.map_or(true, |e| *i <= e))
        .filter_map(|(_, r)| r.id().cloned())
        .filter(|cid| !book_config.ignore_ids.contains(cid))
        .collect()
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
async fn run_producer(
    plan: Vec<ChapterId>,
    storage: Arc<dyn ChapterStorage>,
    skip_existing: bool,
    workers: usize,
    cid_tx: mpsc::Sender<CidMessage>,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
) {
    for cid in plan {
        if cancel.is_cancelled() {
            break;
        }

        if skip_existing {
            match storage.needs_refetch(&cid).await {
                Ok(false) => {
                    tracker.advance(1).await;
                    continue;
                }
                Ok(true) => {}
                Err(err) => warn!(%err, chapter_id = %cid, "skip-existing check failed, will attempt fetch"),
            }
        }

        if cid_tx.send(CidMessage::Fetch(cid)).await.is_err() {
            break;
        }
    }

    for _ in 0..workers {
        let _ = cid_tx.send(CidMessage::Stop).await;
    }
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
async fn run_worker(
    book_id: BookId,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    hooks: Arc<dyn DownloaderHooks>,
    rate_limiter: Arc<TokenBucketRateLimiter>,
    media_dir: PathBuf,
    cid_rx: SharedReceiver<CidMessage>,
    save_tx: mpsc::Sender<SaveMessage>,
    retry_times: u32,
    backoff_factor: f64,
    request_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let cid = match cid_rx.recv().await {
            None | Some(CidMessage::Stop) => {
                let _ = save_tx.send(SaveMessage::Stop).await;
                return;
            }
            Some(CidMessage::Fetch(cid)) => cid,
        };

        if cancel.is_cancelled() {
            let _ = save_tx.send(SaveMessage::Stop).await;
            return;
        }

        match fetch_chapter(
            fetcher.as_ref(),
            parser.as_ref(),
            hooks.as_ref(),
            rate_limiter.as_ref(),
            &book_id,
            &cid,
            retry_times,
            backoff_factor,
        )
        .await
        {
            Some(chapter) => {
                cache_chapter_images(fetcher.as_ref(), &chapter, &media_dir).await;
                if save_tx.send(SaveMessage::Save(chapter)).await.is_err() {
                    return;
                }
            }
            None => warn!(chapter_id = %cid, "chapter abandoned after retries/restriction"),
        }

        request_pacing_sleep(request_interval).await;
    }
}

#[instrument(skip_all)]
async fn run_storage(
    storage: Arc<dyn ChapterStorage>,
    hooks: Arc<dyn DownloaderHooks>,
    mut save_rx: mpsc::Receiver<SaveMessage>,
    workers: usize,
    storage_batch_size: usize,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
) {
    let mut plain_batch = Vec::new();
    let mut refetch_batch = Vec::new();
    let mut stops_seen = 0usize;
    let mut drained_on_cancel = false;

    loop {
        if cancel.is_cancelled() && !drained_on_cancel {
            drained_on_cancel = true;
            loop {
                match save_rx.try_recv() {
                    Ok(SaveMessage::Save(chapter)) => route_chapter(chapter, hooks.as_ref(), &mut plain_batch, &mut refetch_batch),
                    Ok(SaveMessage::Stop) => stops_seen += 1,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        stops_seen = workers;
                        break;
                    }
                }
            }
            flush_batch(storage.as_ref(), &mut plain_batch, false, &tracker).await;
            flush_batch(storage.as_ref(), &mut refetch_batch, true, &tracker).await;
            if stops_seen >= workers {
                break;
            }
            continue;
        }

        match save_rx.recv().await {
            Some(SaveMessage::Stop) => {
                stops_seen += 1;
                if stops_seen >= workers {
                    flush_batch(storage.as_ref(), &mut plain_batch, false, &tracker).await;
                    flush_batch(storage.as_ref(), &mut refetch_batch, true, &tracker).await;
                    break;
                }
            }
            Some(SaveMessage::Save(chapter)) => {
                route_chapter(chapter, hooks.as_ref(), &mut plain_batch, &mut refetch_batch);
                if plain_batch.len() >= storage_batch_size {
                    flush_batch(storage.as_ref(), &mut plain_batch, false, &tracker).await;
                }
                if refetch_batch.len() >= storage_batch_size {
                    flush_batch(storage.as_ref(), &mut refetch_batch, true, &tracker).await;
                }
            }
            None => break,
        }
    }
}

fn route_chapter(chapter: Chapter, hooks: &dyn DownloaderHooks, plain_batch: &mut Vec<Chapter>, refetch_batch: &mut Vec<Chapter>) {
    if hooks.needs_refetch_hook(&chapter) {
        refetch_batch.push(chapter);
    } else {
        plain_batch.push(chapter);
    }
}

async fn flush_batch(storage: &dyn ChapterStorage, batch: &mut Vec<Chapter>, needs_refetch: bool, tracker: &ProgressTracker) {
    if batch.is_empty() {
        return;
    }
    let pending = std::mem::take(batch);
    let count = pending.len();
    match storage.upsert_chapters(&pending, needs_refetch).await {
        Ok(()) => {
            tracker.advance(count).await;
        }
        Err(err) => error!(%err, count, needs_refetch, "storage commit failed, batch dropped"),
    }
}
