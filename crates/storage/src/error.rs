//! Error type for the chapter store and the sibling `book_info.json` helper.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create storage directory {path}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open chapter store at {path}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to (de)serialize chapter extra data")]
    Serde(#[from] serde_json::Error),

    #[error("failed to read book info at {path}")]
    BookInfoRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write book info at {path}")]
    BookInfoWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage task panicked")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StorageError>;
