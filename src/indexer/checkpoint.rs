//! Checkpoint Store: last fully ingested block per stream
//!
//! `advance` is a compare-and-set: the caller passes the checkpoint it read
//! at the start of its cycle, and the write only lands if the stored value
//! still equals it. Implementations make the comparison and the write a
//! single atomic step. A regression is never clamped or ignored.

use super::error::StoreError;
use async_trait::async_trait;

#[derive(Debug)]
pub enum CheckpointError {
    Regression { current: u64, attempted: u64 },
    /// Stored value moved since the caller read it
    Conflict {
        expected: Option<u64>,
        found: Option<u64>,
    },
    Store(StoreError),
}

impl From<StoreError> for CheckpointError {
    fn from(err: StoreError) -> Self {
        CheckpointError::Store(err)
    }
}

impl From<rusqlite::Error> for CheckpointError {
    fn from(err: rusqlite::Error) -> Self {
        CheckpointError::Store(err.into())
    }
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Regression { current, attempted } => write!(
                f,
                "Checkpoint regression: current {}, attempted {}",
                current, attempted
            ),
            CheckpointError::Conflict { expected, found } => write!(
                f,
                "Checkpoint changed concurrently: expected {:?}, found {:?}",
                expected, found
            ),
            CheckpointError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CheckpointError {}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `None` means the stream has never completed a cycle
    async fn load(&self, stream_id: &str) -> Result<Option<u64>, StoreError>;

    /// Move the checkpoint from `expected` to `new_block`.
    ///
    /// `new_block` below `expected` fails with `Regression` before anything
    /// is written. A stored value other than `expected` fails with
    /// `Conflict` and leaves the row untouched.
    async fn advance(
        &self,
        stream_id: &str,
        expected: Option<u64>,
        new_block: u64,
    ) -> Result<(), CheckpointError>;
}

/// Shared regression rule for all backends, applied to the expected value
pub fn check_advance(current: Option<u64>, attempted: u64) -> Result<(), CheckpointError> {
    match current {
        Some(current) if attempted < current => {
            Err(CheckpointError::Regression { current, attempted })
        }
        _ => Ok(()),
    }
}

/// Shared compare rule: the stored value must be the one the caller read
pub fn check_expected(expected: Option<u64>, found: Option<u64>) -> Result<(), CheckpointError> {
    if expected == found {
        Ok(())
    } else {
        Err(CheckpointError::Conflict { expected, found })
    }
}
