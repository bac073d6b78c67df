//! The two bounded channels the pipeline is built from, plus the tagged
//! `Stop` variant that replaces the source's `STOP` sentinel value
//! (`SPEC_FULL.md` §9, "Coroutine control flow → tasks + channels").

use std::sync::Arc;

use quelle_core::{Chapter, ChapterId};
use tokio::sync::{mpsc, Mutex};

/// Item flowing through `cid_queue`.
pub(crate) enum CidMessage {
    Fetch(ChapterId),
    Stop,
}

/// Item flowing through `save_queue`.
pub(crate) enum SaveMessage {
    Save(Chapter),
    Stop,
}

/// A `mpsc::Receiver` shared across multiple worker tasks. `mpsc::Receiver`
/// has no built-in multi-consumer support; wrapping it in a mutex is the
/// standard way to fan a single bounded channel out to a worker pool
/// without an extra broadcast layer.
pub(crate) struct SharedReceiver<T>(Arc<Mutex<mpsc::Receiver<T>>>);

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> SharedReceiver<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>) -> Self {
        Self(Arc::new(Mutex::new(rx)))
    }

    pub(crate) async fn recv(&self) -> Option<T> {
        self.0.lock().await.recv().await
    }
}
