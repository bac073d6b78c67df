//! Fatal, pre-pipeline errors. Everything that can happen once the pipeline
//! is running is non-fatal by design (§4.2.7) and shows up as a log line,
//! never a `Result::Err` from `download_book`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not open chapter storage")]
    Storage(#[from] quelle_storage::StorageError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
