//! The shared per-chapter fetch/parse/retry routine (`SPEC_FULL.md` §4.2.4).
//! Used both by pipeline workers and by `quelle_repair`'s `ChapterIdRepairer`,
//! which the spec requires run "subject to the same retry/backoff as the
//! pipeline" (§4.3).

use std::path::Path;

use quelle_core::{BookId, Chapter, ChapterId, DownloaderHooks, Fetcher, Parser};
use quelle_retry::{backoff_sleep, TokenBucketRateLimiter};
use tracing::{debug, info, instrument, warn};

/// Fetch, parse, and retry a single chapter. Returns `None` when the
/// content is legitimately unavailable (restricted, legitimately empty, or
/// retries exhausted) — never an error, since the caller treats all of
/// these the same way: log and move on.
#[instrument(skip(fetcher, parser, hooks, rate_limiter), fields(book_id = %book_id, chapter_id = %cid))]
pub async fn fetch_chapter(
    fetcher: &dyn Fetcher,
    parser: &dyn Parser,
    hooks: &dyn DownloaderHooks,
    rate_limiter: &TokenBucketRateLimiter,
    book_id: &BookId,
    cid: &ChapterId,
    retry_times: u32,
    backoff_factor: f64,
) -> Option<Chapter> {
    let mut attempt = 0;
    loop {
        rate_limiter.acquire().await;

        let raw_pages = match fetcher.fetch_chapter_content(book_id, cid).await {
            Ok(pages) => pages,
            Err(err) => {
                if attempt < retry_times {
                    warn!(%err, attempt, "chapter fetch failed, retrying");
                    backoff_sleep(backoff_factor, attempt).await;
                    attempt += 1;
                    continue;
                }
                warn!(%err, attempt, "chapter fetch failed, retries exhausted");
                return None;
            }
        };

        if hooks.check_restricted(&raw_pages) {
            warn!("chapter restricted, not retrying");
            return None;
        }

        match parser.parse_chapter(&raw_pages, cid) {
            Some(chapter) => return Some(chapter),
            None => {
                if hooks.check_empty(&raw_pages) {
                    info!("chapter legitimately empty, not retrying");
                    return None;
                }
                if attempt < retry_times {
                    warn!(attempt, "chapter parse returned nothing, retrying");
                    backoff_sleep(backoff_factor, attempt).await;
                    attempt += 1;
                    continue;
                }
                warn!(attempt, "chapter parse returned nothing, retries exhausted");
                return None;
            }
        }
    }
}

/// Best-effort image caching: failures here never fail the calling chapter
/// (`SPEC_FULL.md` §4.2.4 step 6).
#[instrument(skip(fetcher, chapter, media_dir), fields(chapter_id = %chapter.id))]
pub async fn cache_chapter_images(fetcher: &dyn Fetcher, chapter: &Chapter, media_dir: &Path) {
    let urls = extract_image_urls(chapter);
    if urls.is_empty() {
        return;
    }
    if let Err(err) = fetcher.fetch_images(media_dir, &urls).await {
        debug!(%err, count = urls.len(), "image caching failed, ignoring");
    }
}

/// Pull every `type: "url"` entry out of `extra.image_positions`
/// (`{int -> list<{type, data, mime?}>}`), per `SPEC_FULL.md` §6.2.
fn extract_image_urls(chapter: &Chapter) -> Vec<String> {
    let Some(positions) = chapter.extra.get("image_positions").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    positions
        .values()
        .filter_map(|v| v.as_array())
        .flatten()
        .filter(|entry| entry.get("type").and_then(|t| t.as_str()) == Some("url"))
        .filter_map(|entry| entry.get("data").and_then(|d| d.as_str()))
        .map(str::to_string)
        .collect()
}
