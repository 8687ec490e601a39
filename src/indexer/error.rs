use crate::chain::ChainError;

/// Failure talking to the durable store (SQLite or PostgREST)
#[derive(Debug)]
pub enum StoreError {
    Database(String),
    Http(String),
    Serialization(serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Http(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Http(e) => write!(f, "HTTP store error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors that end an ingestion cycle
///
/// Recovery policy:
/// - `UpstreamUnavailable`, `PersistenceFailure`: retry next cycle
/// - `CheckpointRegression`, `InvalidRange`: fatal, stop the stream
/// - `CycleInProgress`: another cycle owns the stream, skip this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexerError {
    UpstreamUnavailable(String),
    InvalidRange { from: u64, to: u64 },
    CheckpointRegression {
        stream_id: String,
        current: u64,
        attempted: u64,
    },
    PersistenceFailure(String),
    CycleInProgress(String),
}

impl IndexerError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexerError::CheckpointRegression { .. } | IndexerError::InvalidRange { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexerError::UpstreamUnavailable(_) | IndexerError::PersistenceFailure(_)
        )
    }
}

impl From<ChainError> for IndexerError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::UpstreamUnavailable(msg) => IndexerError::UpstreamUnavailable(msg),
            ChainError::InvalidRange { from, to } => IndexerError::InvalidRange { from, to },
        }
    }
}

impl From<StoreError> for IndexerError {
    fn from(err: StoreError) -> Self {
        IndexerError::PersistenceFailure(err.to_string())
    }
}

impl std::fmt::Display for IndexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexerError::UpstreamUnavailable(msg) => write!(f, "Upstream unavailable: {}", msg),
            IndexerError::InvalidRange { from, to } => {
                write!(f, "Invalid block range: from {} > to {}", from, to)
            }
            IndexerError::CheckpointRegression {
                stream_id,
                current,
                attempted,
            } => write!(
                f,
                "Checkpoint regression on {}: current {}, attempted {}",
                stream_id, current, attempted
            ),
            IndexerError::PersistenceFailure(msg) => write!(f, "Persistence failure: {}", msg),
            IndexerError::CycleInProgress(stream_id) => {
                write!(f, "Cycle already in progress for {}", stream_id)
            }
        }
    }
}

impl std::error::Error for IndexerError {}
