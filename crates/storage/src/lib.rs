//! Durable chapter storage for the novel crawler core.
//!
//! `ChapterStorage` is the dual-bucket, dedup-aware store the download
//! pipeline drives through its single storage task (`SPEC_FULL.md` §4.1);
//! `BookInfoStore` is the sibling helper that persists a book's catalog as
//! `book_info.json` beside the chapter store.

pub mod backends;
pub mod book_info;
pub mod error;
pub mod traits;

pub use backends::SqliteChapterStorage;
pub use book_info::BookInfoStore;
pub use error::{Result, StorageError};
pub use traits::ChapterStorage;
