//! Error types for the synchronization pipeline.

use thiserror::Error;

use crate::fetch::FetchError;
use crate::sync::processor::BatchStats;

/// Failure of a processor chunk, a Run Log write, or a fetch.
///
/// Item-level problems (unknown plant, excluded material, missing key) are
/// never errors; they are logged and counted as skipped.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A chunk failed after earlier chunks of the same batch had committed.
    #[error("{source} ({} items already committed)", .committed.processed)]
    PartialBatch {
        committed: BatchStats,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Work that stayed committed despite this error.
    pub fn committed(&self) -> BatchStats {
        match self {
            SyncError::PartialBatch { committed, .. } => *committed,
            _ => BatchStats::default(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
