//! Domain model and external contracts for the novel crawler core.
//!
//! This crate has no opinion about how a book's chapters actually get
//! downloaded or stored — it only defines the shapes (`BookInfo`, `Chapter`,
//! ...) and the traits (`Fetcher`, `Parser`, `DownloaderHooks`) that a
//! site-specific plugin implements and that `quelle_pipeline` drives.

pub mod book;
pub mod chapter;
pub mod error;
pub mod fetcher;
pub mod hooks;
pub mod ids;
pub mod parser;

pub use book::{BookConfig, BookInfo, ChapterRef, Volume};
pub use chapter::Chapter;
pub use error::{FetchError, FetchResult};
pub use fetcher::Fetcher;
pub use hooks::{DefaultHooks, DownloaderHooks};
pub use ids::{BookId, ChapterId, SiteKey};
pub use parser::Parser;
