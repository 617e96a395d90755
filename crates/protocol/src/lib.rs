pub mod constants;
pub mod types;

// Re-export primary types for convenience.
pub use types::{
    FailureReason, SessionError, UnknownStatus, UploadMetadata, UploadSnapshot, UploadStatus,
};
