use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediaferry_protocol::{SessionError, UploadMetadata, UploadSnapshot, UploadStatus};

use crate::TransferError;
use crate::progress::Throughput;

/// Durable record of one upload.
///
/// `committed_bytes` only ever moves forward; it mirrors what the server
/// acknowledged and is the cursor every resume starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_handle: Option<String>,
    total_bytes: u64,
    committed_bytes: u64,
    status: UploadStatus,
    #[serde(default)]
    metadata: UploadMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<SessionError>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Creates a new idle session with nothing committed.
    pub fn new(id: String, total_bytes: u64, metadata: UploadMetadata) -> Self {
        let now = Utc::now();
        Self {
            id,
            resource_handle: None,
            total_bytes,
            committed_bytes: 0,
            status: UploadStatus::Idle,
            metadata,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stores the remote handle returned by resource creation.
    pub fn attach_resource(&mut self, handle: String) {
        self.resource_handle = Some(handle);
        self.touch();
    }

    /// Moves the committed cursor to a server-confirmed offset.
    ///
    /// Rejects offsets behind the current cursor or past the end.
    pub fn advance_to(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset < self.committed_bytes {
            return Err(TransferError::OffsetRegression {
                committed: self.committed_bytes,
                requested: offset,
            });
        }
        if offset > self.total_bytes {
            return Err(TransferError::OffsetOverflow {
                offset,
                total: self.total_bytes,
            });
        }
        self.committed_bytes = offset;
        self.touch();
        Ok(())
    }

    pub fn set_status(&mut self, status: UploadStatus) {
        self.status = status;
        self.touch();
    }

    /// Marks the session completed. Fails unless every byte is committed.
    pub fn complete(&mut self) -> Result<(), TransferError> {
        if self.committed_bytes != self.total_bytes {
            return Err(TransferError::Incomplete {
                committed: self.committed_bytes,
                total: self.total_bytes,
            });
        }
        self.last_error = None;
        self.set_status(UploadStatus::Completed);
        Ok(())
    }

    pub fn record_error(&mut self, error: SessionError) {
        self.last_error = Some(error);
        self.touch();
    }

    pub fn clear_error(&mut self) {
        if self.last_error.take().is_some() {
            self.touch();
        }
    }

    /// Builds a UI snapshot with the given throughput figures.
    pub fn snapshot(&self, throughput: Throughput) -> UploadSnapshot {
        UploadSnapshot {
            session_id: self.id.clone(),
            status: self.status,
            committed_bytes: self.committed_bytes,
            total_bytes: self.total_bytes,
            speed_bytes_per_second: throughput.bytes_per_second,
            estimated_seconds_remaining: throughput.estimated_seconds_remaining,
            last_error: self.last_error.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resource_handle(&self) -> Option<&str> {
        self.resource_handle.as_deref()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn committed_bytes(&self) -> u64 {
        self.committed_bytes
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.committed_bytes)
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn metadata(&self) -> &UploadMetadata {
        &self.metadata
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns `true` once the session is completed or cancelled.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns `true` if a later resume or retry may continue this session.
    pub fn is_resumable(&self) -> bool {
        if self.is_terminal() || self.resource_handle.is_none() {
            return false;
        }
        match (&self.status, &self.last_error) {
            (UploadStatus::Failed, Some(err)) => err.reason.is_resumable(),
            _ => true,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
