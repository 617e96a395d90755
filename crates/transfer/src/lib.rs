//! Building blocks for resumable uploads: the session record, chunked
//! reading of the source, the retry schedule and throughput estimation.
//!
//! Everything here is synchronous and free of network I/O; the engine
//! crate composes these pieces around an ingest endpoint.

mod chunked;
mod progress;
mod retry;
mod types;
mod validation;

pub use chunked::{ChunkReader, UploadSource};
pub use progress::{DEFAULT_SAMPLE_INTERVAL, Throughput, ThroughputEstimator};
pub use retry::{ErrorClass, RetryScheduler};
pub use types::UploadSession;
pub use validation::validate_metadata;

/// Default transfer window: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid backoff schedule: {0}")]
    InvalidBackoff(String),

    #[error("offset {requested} is behind committed offset {committed}")]
    OffsetRegression { committed: u64, requested: u64 },

    #[error("offset {offset} is beyond total size {total}")]
    OffsetOverflow { offset: u64, total: u64 },

    #[error("upload incomplete: {committed} of {total} bytes committed")]
    Incomplete { committed: u64, total: u64 },
}
