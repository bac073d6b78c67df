//! Progress reporting. `done`/`total` accounting is internal to the
//! pipeline (§4.2.6); `ProgressSink` is the injectable callback a caller
//! plugs in to observe it, mirroring the original's `Progress` hook.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Observes `(done, total)` as the pipeline advances. Defaults to a no-op so
/// callers who don't care about progress pay nothing.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, done: usize, total: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn on_progress(&self, _done: usize, _total: usize) {}
}

/// Serializes `done` increments and the corresponding `ProgressSink` calls
/// so a sink never observes `done` go backwards, even though both the
/// producer task (skips) and the storage task (commits) advance it
/// concurrently. See `SPEC_FULL.md` §5, "Ordering guarantees".
pub(crate) struct ProgressTracker {
    done: Mutex<usize>,
    total: usize,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressTracker {
    pub(crate) fn new(total: usize, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            done: Mutex::new(0),
            total,
            sink,
        }
    }

    /// Advance `done` by `by` and report the new total under the same lock
    /// that serializes every other caller's advance.
    pub(crate) async fn advance(&self, by: usize) -> usize {
        if by == 0 {
            let done = *self.done.lock().await;
            return done;
        }
        let mut done = self.done.lock().await;
        *done += by;
        let current = *done;
        self.sink.on_progress(current, self.total).await;
        current
    }

    /// Snapshot of `done` for the final `DownloadOutcome`.
    pub(crate) async fn current(&self) -> usize {
        *self.done.lock().await
    }
}
