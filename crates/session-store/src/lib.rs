//! Durable persistence for upload session records.
//!
//! Stores hold only session metadata and the resumption handle, never file
//! bytes. They do not validate session semantics; the engine does.

mod file;
mod memory;

use std::path::PathBuf;

use mediaferry_transfer::UploadSession;

pub use file::{DEFAULT_COALESCE_WINDOW, JsonFileStore};
pub use memory::MemoryStore;

/// Errors from session persistence ("store unavailable").
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid session id: {0:?}")]
    InvalidId(String),
}

/// Durable mapping from session id to session record.
///
/// Implementations must be safe to call concurrently for different ids.
pub trait SessionStore: Send + Sync {
    /// Inserts or replaces the record for `session.id()`.
    fn save(&self, session: &UploadSession) -> Result<(), StoreError>;

    /// Returns the record for `id`, if any.
    fn load(&self, id: &str) -> Result<Option<UploadSession>, StoreError>;

    /// Removes the record for `id`. Missing records are not an error.
    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Returns every stored record.
    fn list_all(&self) -> Result<Vec<UploadSession>, StoreError>;

    /// Writes out any saves that were deferred.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Returns the default directory for session records.
pub fn default_store_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("mediaferry").join("sessions"))
}

/// Returns the platform-specific data directory.
fn data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_DATA_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".local").join("share"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".local").join("share"))
    }
}

/// Checks that a session id is safe to use as a file stem.
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}
