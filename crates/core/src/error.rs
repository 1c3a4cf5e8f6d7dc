use thiserror::Error;

use crate::engine::QueryError;

/// Why a track fetch did not produce data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// A newer request superseded this fetch, or its track was destroyed.
    /// Never surfaced to the user.
    #[error("fetch cancelled")]
    Cancelled,
    #[error("query failed: {0}")]
    Query(#[from] QueryError),
    /// The track's task queue shut down before the fetch ran.
    #[error("task queue closed")]
    QueueClosed,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// How a finished fetch ended.
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Ready(T),
    Cancelled,
    Failed(FetchError),
}

impl<T> From<Result<T, FetchError>> for FetchOutcome<T> {
    fn from(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => FetchOutcome::Ready(value),
            Err(FetchError::Cancelled) => FetchOutcome::Cancelled,
            Err(e) => FetchOutcome::Failed(e),
        }
    }
}
