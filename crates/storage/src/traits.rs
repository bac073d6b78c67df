//! The `ChapterStorage` contract. See `SPEC_FULL.md` §4.1 / §3.
//!
//! One implementation (`SqliteChapterStorage`) ships in [`crate::backends`];
//! the trait exists so the pipeline and the repair step depend on the
//! contract rather than the backend.

use std::collections::HashMap;

use async_trait::async_trait;
use quelle_core::{Chapter, ChapterId};

use crate::error::Result;

/// Durable, keyed, bucketed storage for chapter records.
///
/// Implementations must satisfy the invariants in `SPEC_FULL.md` §3: a row
/// once written as plain (`needs_refetch = false`) is never silently
/// downgraded by a later `needs_refetch = true` write, and `upsert_chapters`
/// is atomic for the whole batch.
#[async_trait]
pub trait ChapterStorage: Send + Sync {
    /// `true` if `cid` has no row, or its row is flagged `needs_refetch`.
    async fn needs_refetch(&self, cid: &ChapterId) -> Result<bool>;

    /// `true` if any row exists for `cid`, regardless of its bucket.
    async fn exists(&self, cid: &ChapterId) -> Result<bool>;

    /// The stored chapter for `cid`, if any.
    async fn get_chapter(&self, cid: &ChapterId) -> Result<Option<Chapter>>;

    /// Bulk form of [`ChapterStorage::get_chapter`]. Every requested id is a
    /// key in the returned map, even when no row was found for it.
    async fn get_chapters(&self, cids: &[ChapterId]) -> Result<HashMap<ChapterId, Option<Chapter>>>;

    /// Single-row convenience wrapper around [`ChapterStorage::upsert_chapters`].
    async fn upsert_chapter(&self, chapter: &Chapter, needs_refetch: bool) -> Result<()> {
        self.upsert_chapters(std::slice::from_ref(chapter), needs_refetch).await
    }

    /// Atomic insert-or-replace of `chapters`, all tagged with the same
    /// `needs_refetch` flag. Either every row in the batch becomes visible,
    /// or none does.
    async fn upsert_chapters(&self, chapters: &[Chapter], needs_refetch: bool) -> Result<()>;

    /// Flush and release any resources. A no-op for backends with nothing to
    /// flush; callers should still call it on every exit path.
    async fn close(&self) -> Result<()>;
}
