//! End-to-end scenarios for `BookDownloader` against an in-memory fetcher
//! and parser, covering the seeded scenarios in `SPEC_FULL.md` §8.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quelle_core::{
    BookConfig, BookId, BookInfo, Chapter, ChapterId, ChapterRef, DefaultHooks, DownloaderHooks,
    FetchError, FetchResult, Fetcher, Parser, SiteKey, Volume,
};
use quelle_pipeline::{BookDownloader, DownloadOutcome, DownloaderConfig, NoopProgressSink, ProgressSink};
use quelle_retry::TokenBucketRateLimiter;
use tokio_util::sync::CancellationToken;

fn book_with_chapters(ids: &[&str]) -> BookInfo {
    BookInfo {
        book_name: "Test Book".into(),
        author: "Author".into(),
        cover_url: None,
        summary: None,
        serial_status: None,
        word_count: None,
        tags: vec![],
        update_time: None,
        last_checked: 0,
        volumes: vec![Volume {
            volume_name: None,
            volume_intro: None,
            volume_cover: None,
            chapters: ids
                .iter()
                .map(|id| ChapterRef {
                    chapter_id: Some(ChapterId::from(*id)),
                    title: None,
                })
                .collect(),
        }],
    }
}

/// Scripted fetcher: each chapter id maps to a number of leading transient
/// failures before it starts succeeding. Records every call it receives.
struct ScriptedFetcher {
    fail_before_success: HashMap<&'static str, u32>,
    calls: Mutex<Vec<String>>,
    counters: Mutex<HashMap<String, u32>>,
}

impl ScriptedFetcher {
    fn new(fail_before_success: HashMap<&'static str, u32>) -> Self {
        Self {
            fail_before_success,
            calls: Mutex::new(Vec::new()),
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn call_count(&self, cid: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == cid).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch_book_info(&self, _book_id: &BookId) -> FetchResult<Vec<String>> {
        Ok(vec![])
    }

    async fn fetch_chapter_content(&self, _book_id: &BookId, chapter_id: &ChapterId) -> FetchResult<Vec<String>> {
        let cid = chapter_id.as_str().to_string();
        self.calls.lock().unwrap().push(cid.clone());

        let mut counters = self.counters.lock().unwrap();
        let attempt = counters.entry(cid.clone()).or_insert(0);
        let needed = self.fail_before_success.get(chapter_id.as_str()).copied().unwrap_or(0);
        if *attempt < needed {
            *attempt += 1;
            return Err(FetchError::request("transient failure"));
        }

        Ok(vec![cid])
    }
}

/// Parser keyed by chapter id: produces `Chapter(id, "T "+id, "body")`, with
/// per-id `extra.encrypted` overrides for the dual-bucket scenario.
struct EchoParser {
    encrypted: Vec<&'static str>,
}

impl EchoParser {
    fn new() -> Self {
        Self { encrypted: Vec::new() }
    }

    fn with_encrypted(ids: Vec<&'static str>) -> Self {
        Self { encrypted: ids }
    }
}

impl Parser for EchoParser {
    fn parse_book_info(&self, _raw_pages: &[String]) -> Option<BookInfo> {
        None
    }

    fn parse_chapter(&self, raw_pages: &[String], chapter_id: &ChapterId) -> Option<Chapter> {
        let cid = raw_pages.first()?;
        let mut chapter = Chapter::new(chapter_id.clone(), format!("T {cid}"), "body");
        if self.encrypted.contains(&cid.as_str()) {
            chapter.extra.insert("encrypted".into(), serde_json::Value::Bool(true));
        }
        Some(chapter)
    }
}

struct RestrictOneHooks {
    restricted_cid: &'static str,
}

impl DownloaderHooks for RestrictOneHooks {
    fn check_restricted(&self, raw_pages: &[String]) -> bool {
        raw_pages.first().map(|p| p.as_str()) == Some(self.restricted_cid)
    }
}

struct EncryptedHooks;

impl DownloaderHooks for EncryptedHooks {
    fn needs_refetch_hook(&self, chapter: &Chapter) -> bool {
        chapter.is_encrypted()
    }
}

struct CountingSink(AtomicUsize);

#[async_trait]
impl ProgressSink for CountingSink {
    async fn on_progress(&self, done: usize, _total: usize) {
        self.0.store(done, Ordering::SeqCst);
    }
}

async fn run(
    book_info: &BookInfo,
    book_config: &BookConfig,
    config: DownloaderConfig,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    hooks: Arc<dyn DownloaderHooks>,
) -> (DownloadOutcome, BookDownloader, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::open(
        dir.path(),
        &SiteKey::from("test-site"),
        book_config.book_id.clone(),
        config,
        fetcher,
        parser,
        hooks,
        Arc::new(TokenBucketRateLimiter::new(0.0)),
    )
    .await
    .unwrap();

    let outcome = downloader
        .download_book(book_info, book_config, CancellationToken::new(), Arc::new(NoopProgressSink))
        .await;

    (outcome, downloader, dir)
}

fn fast_config(workers: usize) -> DownloaderConfig {
    DownloaderConfig {
        workers,
        request_interval: Duration::from_millis(0),
        retry_times: 3,
        backoff_factor: 0.001,
        storage_batch_size: 32,
        skip_existing: true,
        max_rps: 0.0,
    }
}

#[tokio::test]
async fn s1_happy_path() {
    let book = book_with_chapters(&["c1", "c2", "c3"]);
    let cfg = BookConfig::new("b1");
    let fetcher = Arc::new(ScriptedFetcher::new(HashMap::new()));
    let parser = Arc::new(EchoParser::new());

    let (outcome, downloader, _dir) = run(&book, &cfg, fast_config(2), fetcher, parser, Arc::new(DefaultHooks)).await;

    assert_eq!(outcome, DownloadOutcome { done: 3, total: 3, cancelled: false });
    let storage = downloader.storage();
    for cid in ["c1", "c2", "c3"] {
        let chapter = storage.get_chapter(&ChapterId::from(cid)).await.unwrap().unwrap();
        assert_eq!(chapter.title, format!("T {cid}"));
        assert!(!storage.needs_refetch(&ChapterId::from(cid)).await.unwrap());
    }
}

#[tokio::test]
async fn s2_range_and_ignore() {
    let book = book_with_chapters(&["c1", "c2", "c3"]);
    let cfg = BookConfig::new("b1")
        .with_range(Some(ChapterId::from("c2")), Some(ChapterId::from("c3")))
        .with_ignored([ChapterId::from("c3")].into_iter().collect());
    let fetcher = Arc::new(ScriptedFetcher::new(HashMap::new()));
    let parser = Arc::new(EchoParser::new());

    let (outcome, downloader, _dir) = run(&book, &cfg, fast_config(2), fetcher.clone(), parser, Arc::new(DefaultHooks)).await;

    assert_eq!(outcome, DownloadOutcome { done: 1, total: 1, cancelled: false });
    assert!(downloader.storage().exists(&ChapterId::from("c2")).await.unwrap());
    assert!(!downloader.storage().exists(&ChapterId::from("c1")).await.unwrap());
    assert!(!downloader.storage().exists(&ChapterId::from("c3")).await.unwrap());
    assert_eq!(fetcher.call_count("c1"), 0);
    assert_eq!(fetcher.call_count("c3"), 0);
}

#[tokio::test(start_paused = true)]
async fn s3_retry_then_success() {
    let book = book_with_chapters(&["c1", "c2", "c3"]);
    let cfg = BookConfig::new("b1");
    let fetcher = Arc::new(ScriptedFetcher::new(HashMap::from([("c2", 2)])));
    let parser = Arc::new(EchoParser::new());

    let (outcome, downloader, _dir) = run(&book, &cfg, fast_config(1), fetcher.clone(), parser, Arc::new(DefaultHooks)).await;

    assert_eq!(outcome.done, 3);
    assert_eq!(outcome.total, 3);
    // 2 failures + 1 success = 3 attempts total for c2.
    assert_eq!(fetcher.call_count("c2"), 3);
    assert!(downloader.storage().exists(&ChapterId::from("c2")).await.unwrap());
}

#[tokio::test]
async fn s4_restricted_is_not_retried_or_stored() {
    let book = book_with_chapters(&["c1", "c2", "c3"]);
    let cfg = BookConfig::new("b1");
    let fetcher = Arc::new(ScriptedFetcher::new(HashMap::new()));
    let parser = Arc::new(EchoParser::new());
    let hooks = Arc::new(RestrictOneHooks { restricted_cid: "c2" });

    let (outcome, downloader, _dir) = run(&book, &cfg, fast_config(2), fetcher.clone(), parser, hooks).await;

    assert_eq!(outcome.done, 2);
    assert_eq!(outcome.total, 3);
    assert_eq!(fetcher.call_count("c2"), 1);
    assert!(!downloader.storage().exists(&ChapterId::from("c2")).await.unwrap());
    assert!(downloader.storage().exists(&ChapterId::from("c1")).await.unwrap());
    assert!(downloader.storage().exists(&ChapterId::from("c3")).await.unwrap());
}

#[tokio::test]
async fn s5_dual_bucket_routes_encrypted_chapters_separately() {
    let book = book_with_chapters(&["c1", "c2", "c3"]);
    let cfg = BookConfig::new("b1");
    let fetcher = Arc::new(ScriptedFetcher::new(HashMap::new()));
    let parser: Arc<dyn Parser> = Arc::new(EchoParser::with_encrypted(vec!["c2"]));
    let hooks: Arc<dyn DownloaderHooks> = Arc::new(EncryptedHooks);

    let dir = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::open(
        dir.path(),
        &SiteKey::from("test-site"),
        BookId::from("b1"),
        fast_config(2),
        fetcher.clone(),
        parser.clone(),
        hooks.clone(),
        Arc::new(TokenBucketRateLimiter::new(0.0)),
    )
    .await
    .unwrap();

    let outcome = downloader
        .download_book(&book, &cfg, CancellationToken::new(), Arc::new(NoopProgressSink))
        .await;
    assert_eq!(outcome.done, 3);

    let storage = downloader.storage();
    assert!(!storage.needs_refetch(&ChapterId::from("c1")).await.unwrap());
    assert!(!storage.needs_refetch(&ChapterId::from("c3")).await.unwrap());
    assert!(storage.needs_refetch(&ChapterId::from("c2")).await.unwrap());

    // Re-running with skip_existing=true should only re-fetch the
    // needs-refetch bucket entry; c1/c3 are already plain.
    let outcome2 = downloader
        .download_book(&book, &cfg, CancellationToken::new(), Arc::new(NoopProgressSink))
        .await;
    assert_eq!(outcome2.done, 3);
    assert_eq!(fetcher.call_count("c1"), 1);
    assert_eq!(fetcher.call_count("c3"), 1);
    assert_eq!(fetcher.call_count("c2"), 2);
}

#[tokio::test]
async fn s6_skip_existing_does_not_refetch_plain_rows() {
    let book = book_with_chapters(&["c1", "c2", "c3"]);
    let cfg = BookConfig::new("b1");
    let fetcher = Arc::new(ScriptedFetcher::new(HashMap::new()));
    let parser = Arc::new(EchoParser::new());

    let dir = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::open(
        dir.path(),
        &SiteKey::from("test-site"),
        BookId::from("b1"),
        fast_config(2),
        fetcher.clone(),
        parser.clone(),
        Arc::new(DefaultHooks),
        Arc::new(TokenBucketRateLimiter::new(0.0)),
    )
    .await
    .unwrap();

    // Pre-populate c1 as plain.
    let pre = Chapter::new(ChapterId::from("c1"), "Pre T c1", "body");
    downloader.storage().upsert_chapter(&pre, false).await.unwrap();

    let outcome = downloader
        .download_book(&book, &cfg, CancellationToken::new(), Arc::new(NoopProgressSink))
        .await;

    assert_eq!(outcome, DownloadOutcome { done: 3, total: 3, cancelled: false });
    assert_eq!(fetcher.call_count("c1"), 0);
    assert_eq!(fetcher.call_count("c2"), 1);
    assert_eq!(fetcher.call_count("c3"), 1);

    // The pre-populated row must not have been overwritten by a refetch.
    let c1 = downloader.storage().get_chapter(&ChapterId::from("c1")).await.unwrap().unwrap();
    assert_eq!(c1.title, "Pre T c1");
}

#[tokio::test]
async fn s7_cancellation_terminates_deterministically_and_flushes_committed_rows() {
    let ids: Vec<String> = (0..100).map(|i| format!("c{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let book = book_with_chapters(&id_refs);
    let cfg = BookConfig::new("b1");
    let fetcher = Arc::new(ScriptedFetcher::new(HashMap::new()));
    let parser = Arc::new(EchoParser::new());

    let dir = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::open(
        dir.path(),
        &SiteKey::from("test-site"),
        BookId::from("b1"),
        fast_config(4),
        fetcher.clone(),
        parser,
        Arc::new(DefaultHooks),
        Arc::new(TokenBucketRateLimiter::new(0.0)),
    )
    .await
    .unwrap();

    let cancel = CancellationToken::new();
    let sink = Arc::new(CountingSink(AtomicUsize::new(0)));

    // Cancel promptly; the pipeline must still terminate and flush whatever
    // had already committed, with no half-written rows.
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel_clone.cancel();
    });

    let outcome = downloader.download_book(&book, &cfg, cancel, sink.clone()).await;

    assert!(outcome.done <= outcome.total);
    assert_eq!(outcome.total, 100);

    // Every row actually present in storage must be a full, valid chapter
    // (no partial writes) — re-reading never panics and matches the echoed
    // title format.
    for id in &ids {
        if downloader.storage().exists(&ChapterId::from(id.as_str())).await.unwrap() {
            let chapter = downloader.storage().get_chapter(&ChapterId::from(id.as_str())).await.unwrap().unwrap();
            assert_eq!(chapter.title, format!("T {id}"));
        }
    }
}
