//! Chunk transfer engine.
//!
//! [`UploadEngine`] creates and resumes upload sessions against an
//! [`IngestEndpoint`](mediaferry_ingest::IngestEndpoint), persisting progress
//! in a [`SessionStore`](mediaferry_session_store::SessionStore). Each
//! session is driven by one background task and controlled through an
//! [`UploadHandle`].

mod classify;
mod config;
mod engine;
mod handle;
mod runner;
mod state;

#[cfg(test)]
mod mock;

use mediaferry_protocol::{FailureReason, UploadStatus};

pub use config::EngineConfig;
pub use engine::{MetadataValidator, UploadEngine};
pub use handle::UploadHandle;

/// Errors returned by engine and handle operations.
///
/// Failures of the transfer itself are not errors here; they surface as a
/// `failed` status with a [`SessionError`](mediaferry_protocol::SessionError).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {0} is already active")]
    AlreadyActive(String),

    #[error("cannot {op} a session that is {from}")]
    InvalidTransition {
        from: UploadStatus,
        op: &'static str,
    },

    #[error("upload must be started again ({0})")]
    RestartRequired(FailureReason),

    #[error("source is {actual} bytes but the session expects {expected}")]
    SourceMismatch { expected: u64, actual: u64 },

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("byte source is no longer available")]
    SourceUnavailable,

    #[error("store error: {0}")]
    Store(#[from] mediaferry_session_store::StoreError),

    #[error("transfer error: {0}")]
    Transfer(#[from] mediaferry_transfer::TransferError),

    #[error("background task failed: {0}")]
    Task(String),
}
