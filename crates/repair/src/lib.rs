//! `ChapterIdRepairer`: fills in missing `chapterId` entries in a book's
//! catalog before the download pipeline runs, by following `extra.next_cid`
//! chains from the nearest known chapter (`SPEC_FULL.md` §4.3).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use quelle_core::{BookId, BookInfo, ChapterId, DownloaderHooks, Fetcher, Parser};
use quelle_pipeline::fetch_chapter;
use quelle_retry::{request_pacing_sleep, TokenBucketRateLimiter};
use quelle_storage::{BookInfoStore, ChapterStorage};
use tracing::{instrument, warn};

/// Walks `BookInfo.volumes` and repairs missing `chapterId`s by chaining
/// `next_cid` from the nearest preceding chapter with a known id, reusing
/// the same fetch/parse/retry path as the download pipeline.
pub struct ChapterIdRepairer {
    book_id: BookId,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    hooks: Arc<dyn DownloaderHooks>,
    rate_limiter: Arc<TokenBucketRateLimiter>,
    storage: Arc<dyn ChapterStorage>,
    book_info_store: BookInfoStore,
    retry_times: u32,
    backoff_factor: f64,
    request_interval: Duration,
}

#[allow(clippy::too_many_arguments)]
impl ChapterIdRepairer {
    pub fn new(
        book_id: BookId,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn Parser>,
        hooks: Arc<dyn DownloaderHooks>,
        rate_limiter: Arc<TokenBucketRateLimiter>,
        storage: Arc<dyn ChapterStorage>,
        book_info_store: BookInfoStore,
        retry_times: u32,
        backoff_factor: f64,
        request_interval: Duration,
    ) -> Self {
        Self {
            book_id,
            fetcher,
            parser,
            hooks,
            rate_limiter,
            storage,
            book_info_store,
            retry_times,
            backoff_factor,
            request_interval,
        }
    }

    /// Repairs `book_info` in place and persists it regardless of whether
    /// anything changed, then returns whether any `chapterId` was filled in.
    #[instrument(skip_all, fields(book_id = %self.book_id))]
    pub async fn repair(&self, book_info: &mut BookInfo) -> quelle_storage::Result<bool> {
        let mut seen: HashSet<ChapterId> = book_info.chapter_refs().filter_map(|r| r.id().cloned()).collect();
        let mut prev_cid: Option<ChapterId> = None;
        let mut changed = false;

        for chapter_ref in book_info.chapter_refs_mut() {
            if let Some(id) = chapter_ref.id() {
                prev_cid = Some(id.clone());
                continue;
            }

            let Some(anchor) = prev_cid.clone() else {
                // No anchor yet: nothing precedes this entry with a known id.
                continue;
            };

            let Some(prior) = self.load_chapter(&anchor).await else {
                warn!(chapter_id = %anchor, "could not load prior chapter, skipping repair for this entry");
                continue;
            };

            let Some(next_cid) = prior.next_cid() else {
                warn!(chapter_id = %anchor, "prior chapter carries no next_cid, skipping repair for this entry");
                continue;
            };

            if seen.contains(&next_cid) {
                warn!(chapter_id = %next_cid, "repaired id already present in catalog, skipping to avoid duplicate");
                continue;
            }

            chapter_ref.chapter_id = Some(next_cid.clone());
            seen.insert(next_cid.clone());
            prev_cid = Some(next_cid);
            changed = true;
        }

        self.book_info_store.save(book_info).await?;
        Ok(changed)
    }

    /// Prefer the cached row; only fetch (subject to the pipeline's own
    /// retry/backoff and pacing) when `cid` has no cached chapter at all.
    async fn load_chapter(&self, cid: &ChapterId) -> Option<quelle_core::Chapter> {
        match self.storage.get_chapter(cid).await {
            Ok(Some(chapter)) => return Some(chapter),
            Ok(None) => {}
            Err(err) => {
                warn!(%err, chapter_id = %cid, "storage lookup failed during repair, falling back to fetch");
            }
        }

        let chapter = fetch_chapter(
            self.fetcher.as_ref(),
            self.parser.as_ref(),
            self.hooks.as_ref(),
            self.rate_limiter.as_ref(),
            &self.book_id,
            cid,
            self.retry_times,
            self.backoff_factor,
        )
        .await?;

        let needs_refetch = self.hooks.needs_refetch_hook(&chapter);
        if let Err(err) = self.storage.upsert_chapter(&chapter, needs_refetch).await {
            warn!(%err, chapter_id = %cid, "failed to persist repaired anchor chapter");
        }

        request_pacing_sleep(self.request_interval).await;

        Some(chapter)
    }
}
