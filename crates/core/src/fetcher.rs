//! The `Fetcher` contract: everything the core needs from a site's HTTP
//! flow. Implementations own their session, cookies, pacing, and retries
//! within a single call — the pipeline only ever sees `FetchResult`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::FetchResult;
use crate::ids::{BookId, ChapterId};

/// Consumed, not implemented, by the core. A production crawler backs this
/// with per-site HTTP logic (or a loaded plugin); the pipeline treats it as
/// an opaque collaborator.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Raw page payload(s) for a book's landing/catalog page.
    async fn fetch_book_info(&self, book_id: &BookId) -> FetchResult<Vec<String>>;

    /// Raw page payload(s) for a single chapter.
    async fn fetch_chapter_content(
        &self,
        book_id: &BookId,
        chapter_id: &ChapterId,
    ) -> FetchResult<Vec<String>>;

    /// Best-effort: cache a single image to `dir`, returning the path it
    /// was written to. Failures here must never fail the calling chapter.
    async fn fetch_image(
        &self,
        _url: &str,
        _dir: &Path,
        _name: Option<&str>,
    ) -> FetchResult<Option<PathBuf>> {
        Ok(None)
    }

    /// Best-effort: cache a batch of images to `dir`.
    async fn fetch_images(&self, _dir: &Path, _urls: &[String]) -> FetchResult<()> {
        Ok(())
    }

    /// Optional session establishment; most sites need no login.
    async fn login(&self) -> FetchResult<bool> {
        Ok(true)
    }
}
