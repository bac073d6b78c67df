//! SQLite-backed [`ChapterStorage`]. See `SPEC_FULL.md` §6.4 for the schema
//! and the resolved Open Question on plain-vs-needs-refetch precedence.
//!
//! A single connection is shared behind a `tokio::sync::Mutex` and every
//! operation runs inside `spawn_blocking`, matching the concurrency contract
//! in §4.1: the pipeline only ever drives this from one task at a time, but
//! the handle itself stays `Send + Sync` so the repair step and exporters
//! can also hold it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use quelle_core::{Chapter, ChapterId};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::{Result, StorageError};
use crate::traits::ChapterStorage;

pub struct SqliteChapterStorage {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteChapterStorage {
    /// Open or create the chapter store at `dir/filename`, creating `dir` if
    /// it doesn't exist yet. Mirrors the Python context-manager idiom: the
    /// returned handle owns the connection until [`ChapterStorage::close`]
    /// or drop.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display(), filename))]
    pub async fn open(dir: impl AsRef<Path>, filename: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;

        let path = dir.join(filename);
        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&open_path).map_err(|source| StorageError::Open {
                path: open_path.display().to_string(),
                source,
            })?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS chapters (
                     id            TEXT PRIMARY KEY,
                     title         TEXT NOT NULL,
                     content       TEXT NOT NULL,
                     extra_json    TEXT NOT NULL,
                     needs_refetch INTEGER NOT NULL
                 );",
            )?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    fn row_to_chapter(id: &str, title: String, content: String, extra_json: String) -> Result<Chapter> {
        let extra = serde_json::from_str(&extra_json)?;
        Ok(Chapter {
            id: ChapterId::from(id),
            title,
            content,
            extra,
        })
    }
}

#[async_trait]
impl ChapterStorage for SqliteChapterStorage {
    #[instrument(skip(self))]
    async fn needs_refetch(&self, cid: &ChapterId) -> Result<bool> {
        let conn = self.conn.clone();
        let cid = cid.as_str().to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = conn.blocking_lock();
            let flag: Option<i64> = conn
                .query_row("SELECT needs_refetch FROM chapters WHERE id = ?1", params![cid], |row| row.get(0))
                .optional()?;
            Ok(match flag {
                None => true,
                Some(f) => f != 0,
            })
        })
        .await?
    }

    #[instrument(skip(self))]
    async fn exists(&self, cid: &ChapterId) -> Result<bool> {
        let conn = self.conn.clone();
        let cid = cid.as_str().to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = conn.blocking_lock();
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM chapters WHERE id = ?1", params![cid], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
        .await?
    }

    #[instrument(skip(self))]
    async fn get_chapter(&self, cid: &ChapterId) -> Result<Option<Chapter>> {
        let conn = self.conn.clone();
        let cid_owned = cid.as_str().to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Chapter>> {
            let conn = conn.blocking_lock();
            let row = conn
                .query_row(
                    "SELECT title, content, extra_json FROM chapters WHERE id = ?1 ORDER BY needs_refetch ASC LIMIT 1",
                    params![cid_owned],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            row.map(|(title, content, extra_json)| Self::row_to_chapter(&cid_owned, title, content, extra_json))
                .transpose()
        })
        .await?
    }

    #[instrument(skip(self, cids))]
    async fn get_chapters(&self, cids: &[ChapterId]) -> Result<HashMap<ChapterId, Option<Chapter>>> {
        let mut out = HashMap::with_capacity(cids.len());
        for cid in cids {
            let chapter = self.get_chapter(cid).await?;
            out.insert(cid.clone(), chapter);
        }
        Ok(out)
    }

    #[instrument(skip(self, chapters), fields(count = chapters.len(), needs_refetch))]
    async fn upsert_chapters(&self, chapters: &[Chapter], needs_refetch: bool) -> Result<()> {
        if chapters.is_empty() {
            return Ok(());
        }

        let rows = chapters
            .iter()
            .map(|c| {
                Ok((
                    c.id.as_str().to_string(),
                    c.title.clone(),
                    c.content.clone(),
                    serde_json::to_string(&c.extra)?,
                ))
            })
            .collect::<Result<Vec<(String, String, String, String)>>>()?;

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            {
                // Once a row is plain (needs_refetch = 0) it is never
                // downgraded by a later needs_refetch write: the WHERE
                // clause only allows the UPDATE when the incoming row is
                // itself plain, or the existing row was already
                // needs_refetch. See SPEC_FULL.md §3 / the resolved Open
                // Question in §9.
                let mut stmt = tx.prepare(
                    "INSERT INTO chapters (id, title, content, extra_json, needs_refetch)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                         title = excluded.title,
                         content = excluded.content,
                         extra_json = excluded.extra_json,
                         needs_refetch = excluded.needs_refetch
                     WHERE excluded.needs_refetch = 0 OR chapters.needs_refetch = 1",
                )?;
                for (id, title, content, extra_json) in &rows {
                    stmt.execute(params![id, title, content, extra_json, needs_refetch as i64])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    async fn close(&self) -> Result<()> {
        // The connection flushes on every commit; nothing to do beyond that,
        // but callers still call this on every exit path per the RAII
        // contract in SPEC_FULL.md §4.1.
        Ok(())
    }
}

impl std::fmt::Debug for SqliteChapterStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteChapterStorage").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quelle_core::Chapter;

    async fn open_temp() -> (tempfile::TempDir, SqliteChapterStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteChapterStorage::open(dir.path(), "chapter.raw.sqlite").await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn missing_chapter_needs_refetch() {
        let (_dir, storage) = open_temp().await;
        assert!(storage.needs_refetch(&ChapterId::from("c1")).await.unwrap());
        assert!(!storage.exists(&ChapterId::from("c1")).await.unwrap());
    }

    #[tokio::test]
    async fn plain_round_trips_and_is_not_needs_refetch() {
        let (_dir, storage) = open_temp().await;
        let chapter = Chapter::new(ChapterId::from("c1"), "Title", "Body");
        storage.upsert_chapter(&chapter, false).await.unwrap();

        assert!(!storage.needs_refetch(&ChapterId::from("c1")).await.unwrap());
        let got = storage.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
        assert_eq!(got.id, chapter.id);
        assert_eq!(got.title, chapter.title);
        assert_eq!(got.content, chapter.content);
    }

    #[tokio::test]
    async fn needs_refetch_bucket_is_refetchable() {
        let (_dir, storage) = open_temp().await;
        let chapter = Chapter::new(ChapterId::from("c1"), "Title", "Body");
        storage.upsert_chapter(&chapter, true).await.unwrap();
        assert!(storage.needs_refetch(&ChapterId::from("c1")).await.unwrap());
        assert!(storage.exists(&ChapterId::from("c1")).await.unwrap());
    }

    #[tokio::test]
    async fn plain_never_downgrades() {
        let (_dir, storage) = open_temp().await;
        let plain = Chapter::new(ChapterId::from("c1"), "Plain", "Body");
        storage.upsert_chapter(&plain, false).await.unwrap();

        let refetch_attempt = Chapter::new(ChapterId::from("c1"), "Refetch", "Other body");
        storage.upsert_chapter(&refetch_attempt, true).await.unwrap();

        assert!(!storage.needs_refetch(&ChapterId::from("c1")).await.unwrap());
        let got = storage.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
        assert_eq!(got.title, "Plain");
    }

    #[tokio::test]
    async fn plain_can_upgrade_over_needs_refetch() {
        let (_dir, storage) = open_temp().await;
        let refetch = Chapter::new(ChapterId::from("c1"), "Refetch", "Body");
        storage.upsert_chapter(&refetch, true).await.unwrap();

        let plain = Chapter::new(ChapterId::from("c1"), "Plain", "Fixed body");
        storage.upsert_chapter(&plain, false).await.unwrap();

        assert!(!storage.needs_refetch(&ChapterId::from("c1")).await.unwrap());
        let got = storage.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
        assert_eq!(got.title, "Plain");
    }

    #[tokio::test]
    async fn batch_upsert_is_atomic_and_bulk_get_covers_misses() {
        let (_dir, storage) = open_temp().await;
        let chapters = vec![
            Chapter::new(ChapterId::from("c1"), "T1", "B1"),
            Chapter::new(ChapterId::from("c2"), "T2", "B2"),
        ];
        storage.upsert_chapters(&chapters, false).await.unwrap();

        let got = storage
            .get_chapters(&[ChapterId::from("c1"), ChapterId::from("c2"), ChapterId::from("missing")])
            .await
            .unwrap();
        assert_eq!(got.len(), 3);
        assert!(got[&ChapterId::from("c1")].is_some());
        assert!(got[&ChapterId::from("c2")].is_some());
        assert!(got[&ChapterId::from("missing")].is_none());
    }

    #[tokio::test]
    async fn extra_map_round_trips() {
        let (_dir, storage) = open_temp().await;
        let mut chapter = Chapter::new(ChapterId::from("c1"), "T", "B");
        chapter.extra.insert("next_cid".into(), serde_json::Value::String("c2".into()));
        storage.upsert_chapter(&chapter, false).await.unwrap();

        let got = storage.get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
        assert_eq!(got.next_cid(), Some(ChapterId::from("c2")));
    }
}
