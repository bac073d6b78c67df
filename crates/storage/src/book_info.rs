//! Sibling helper that persists `BookInfo` as `book_info.json` next to a
//! book's chapter store. Not part of the `ChapterStorage` trait itself —
//! `BookInfo` has no per-row bucket semantics, so it gets its own tiny
//! read/write helper instead. See `SPEC_FULL.md` §4.1.

use std::path::{Path, PathBuf};

use quelle_core::BookInfo;
use tracing::instrument;

use crate::error::{Result, StorageError};

const FILENAME: &str = "book_info.json";

#[derive(Debug, Clone)]
pub struct BookInfoStore {
    path: PathBuf,
}

impl BookInfoStore {
    /// Points at `dir/book_info.json`. Does not touch the filesystem; `dir`
    /// is created lazily on first [`BookInfoStore::save`].
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(FILENAME),
        }
    }

    /// `None` if the file doesn't exist yet (first run for this book).
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<Option<BookInfo>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::BookInfoRead {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Writes UTF-8 JSON without a BOM, creating the parent directory if
    /// needed. Writes to a `.tmp` sibling first and renames into place so a
    /// crash mid-write never leaves a half-written `book_info.json`.
    #[instrument(skip(self, info), fields(path = %self.path.display()))]
    pub async fn save(&self, info: &BookInfo) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|source| StorageError::BookInfoWrite {
                path: self.path.display().to_string(),
                source,
            })?;
        }

        let json = serde_json::to_vec_pretty(info)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await.map_err(|source| StorageError::BookInfoWrite {
            path: tmp_path.display().to_string(),
            source,
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|source| StorageError::BookInfoWrite {
            path: self.path.display().to_string(),
            source,
        })
    }
}
