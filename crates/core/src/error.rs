//! Error type shared by the `Fetcher` and `Parser` contracts.
//!
//! The pipeline's retry loop treats every `FetchError` the same way
//! (transient, retry with backoff) — see `SPEC_FULL.md` §7. Sites that need
//! to signal "don't retry this" use the `check_restricted`/`check_empty`
//! hooks instead of a distinct error variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {message}")]
    Request {
        message: String,
        #[source]
        source: Option<eyre::Report>,
    },

    #[error("failed to parse response")]
    Parse {
        #[source]
        source: Option<eyre::Report>,
    },

    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl FetchError {
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
            source: None,
        }
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
