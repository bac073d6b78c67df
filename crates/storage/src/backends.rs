//! Backend implementations of [`crate::traits::ChapterStorage`].

mod sqlite;

pub use sqlite::SqliteChapterStorage;
