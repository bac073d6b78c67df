//! The `Parser` contract: a pure function over raw pages. No I/O, no
//! retries — the pipeline owns all of that.

use crate::book::BookInfo;
use crate::chapter::Chapter;
use crate::ids::ChapterId;

/// Consumed, not implemented, by the core. `None` from either method means
/// "nothing usable came out of these pages"; the pipeline's `check_empty`
/// hook decides whether that's a legitimate empty result or a transient
/// failure worth retrying.
pub trait Parser: Send + Sync {
    fn parse_book_info(&self, raw_pages: &[String]) -> Option<BookInfo>;

    fn parse_chapter(&self, raw_pages: &[String], chapter_id: &ChapterId) -> Option<Chapter>;
}
