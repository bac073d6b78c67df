//! Catalog types: `BookInfo`, its `Volume`s and `ChapterRef`s, and the
//! `BookConfig` that selects a subset of the catalog to download.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::{BookId, ChapterId};

/// Input describing which chapters of a book to download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookConfig {
    pub book_id: BookId,
    pub start_id: Option<ChapterId>,
    pub end_id: Option<ChapterId>,
    #[serde(default)]
    pub ignore_ids: HashSet<ChapterId>,
}

impl BookConfig {
    pub fn new(book_id: impl Into<BookId>) -> Self {
        Self {
            book_id: book_id.into(),
            start_id: None,
            end_id: None,
            ignore_ids: HashSet::new(),
        }
    }

    pub fn with_range(mut self, start_id: Option<ChapterId>, end_id: Option<ChapterId>) -> Self {
        self.start_id = start_id;
        self.end_id = end_id;
        self
    }

    pub fn with_ignored(mut self, ignore_ids: HashSet<ChapterId>) -> Self {
        self.ignore_ids = ignore_ids;
        self
    }
}

/// A single entry in a book's catalog. `chapter_id` may be absent — see
/// [`crate`] docs and the pipeline's `ChapterIdRepairer` for how those get
/// filled in before a download starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterRef {
    pub chapter_id: Option<ChapterId>,
    pub title: Option<String>,
}

impl ChapterRef {
    pub fn id(&self) -> Option<&ChapterId> {
        self.chapter_id.as_ref().filter(|id| !id.is_empty())
    }
}

/// A titled group of chapters within a book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    pub volume_name: Option<String>,
    pub volume_intro: Option<String>,
    pub volume_cover: Option<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterRef>,
}

/// Book metadata plus its full catalog, as produced by a site `Parser`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookInfo {
    pub book_name: String,
    pub author: String,
    pub cover_url: Option<String>,
    pub summary: Option<String>,
    pub serial_status: Option<String>,
    pub word_count: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub update_time: Option<String>,
    /// Seconds since the Unix epoch. See `SPEC_FULL.md` §3 for why this is
    /// an integer rather than the float/int union the original allows.
    pub last_checked: i64,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl BookInfo {
    /// `true` when the cached copy is fresh enough to skip a re-fetch
    /// (within 24 hours of `now`).
    pub fn is_fresh(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let age = now.timestamp() - self.last_checked;
        age >= 0 && age < 24 * 60 * 60
    }

    /// Iterate every chapter reference across every volume, in catalog order.
    pub fn chapter_refs(&self) -> impl Iterator<Item = &ChapterRef> {
        self.volumes.iter().flat_map(|v| v.chapters.iter())
    }

    /// Iterate every chapter reference mutably, in catalog order.
    pub fn chapter_refs_mut(&mut self) -> impl Iterator<Item = &mut ChapterRef> {
        self.volumes.iter_mut().flat_map(|v| v.chapters.iter_mut())
    }
}
