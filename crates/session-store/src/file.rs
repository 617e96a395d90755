use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mediaferry_protocol::UploadStatus;
use mediaferry_transfer::UploadSession;
use tracing::{debug, warn};

use crate::{SessionStore, StoreError, validate_id};

/// Saves for the same id closer together than this are coalesced.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_secs(1);

const RECORD_EXTENSION: &str = "json";

/// Per-id write state. The mutex around it serializes saves and deletes for
/// one id; entries stay registered after a delete so that holds for the
/// store's lifetime.
#[derive(Default)]
struct Entry {
    last_write: Option<Instant>,
    written_status: Option<UploadStatus>,
    pending: Option<UploadSession>,
}

/// Session store keeping one JSON file per session in a directory.
///
/// Records are written atomically (temp file, then rename). A save that
/// arrives within the coalesce window of the previous write for the same
/// id, without a status change, is held in memory until the next write or
/// [`flush`](SessionStore::flush). Reads observe held records.
pub struct JsonFileStore {
    dir: PathBuf,
    coalesce_window: Duration,
    entries: Mutex<HashMap<String, Arc<Mutex<Entry>>>>,
}

impl JsonFileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: PathBuf) -> Result<Self, StoreError> {
        Self::with_coalesce_window(dir, DEFAULT_COALESCE_WINDOW)
    }

    /// Opens a store with a custom coalesce window. `Duration::ZERO`
    /// writes every save through.
    pub fn with_coalesce_window(dir: PathBuf, window: Duration) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            coalesce_window: window,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn entry(&self, id: &str) -> Arc<Mutex<Entry>> {
        let mut entries = self.entries.lock().unwrap();
        Arc::clone(entries.entry(id.to_string()).or_default())
    }

    fn existing_entry(&self, id: &str) -> Option<Arc<Mutex<Entry>>> {
        self.entries.lock().unwrap().get(id).cloned()
    }

    fn write_record(&self, session: &UploadSession) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(session)?;
        let path = self.record_path(session.id());
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        debug!(
            session = %session.id(),
            committed = session.committed_bytes(),
            status = %session.status(),
            "persisted session"
        );
        Ok(())
    }

    fn read_record(path: &Path) -> Result<Option<UploadSession>, StoreError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }
}

impl SessionStore for JsonFileStore {
    fn save(&self, session: &UploadSession) -> Result<(), StoreError> {
        validate_id(session.id())?;
        let entry = self.entry(session.id());
        let mut state = entry.lock().unwrap();

        let now = Instant::now();
        let recent = state
            .last_write
            .is_some_and(|t| now.duration_since(t) < self.coalesce_window);
        if recent && state.written_status == Some(session.status()) {
            state.pending = Some(session.clone());
            return Ok(());
        }

        self.write_record(session)?;
        state.last_write = Some(now);
        state.written_status = Some(session.status());
        state.pending = None;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<UploadSession>, StoreError> {
        validate_id(id)?;
        if let Some(entry) = self.existing_entry(id) {
            let state = entry.lock().unwrap();
            if let Some(pending) = &state.pending {
                return Ok(Some(pending.clone()));
            }
        }
        Self::read_record(&self.record_path(id))
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        validate_id(id)?;
        let entry = self.entry(id);
        let mut state = entry.lock().unwrap();
        match std::fs::remove_file(self.record_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *state = Entry::default();
        debug!(session = %id, "deleted session record");
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<UploadSession>, StoreError> {
        let mut sessions = HashMap::new();
        for dir_entry in std::fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read_record(&path) {
                Ok(Some(session)) => {
                    sessions.insert(session.id().to_string(), session);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session record");
                }
            }
        }

        let entries: Vec<Arc<Mutex<Entry>>> =
            self.entries.lock().unwrap().values().cloned().collect();
        for entry in entries {
            if let Some(pending) = &entry.lock().unwrap().pending {
                sessions.insert(pending.id().to_string(), pending.clone());
            }
        }

        let mut sessions: Vec<UploadSession> = sessions.into_values().collect();
        sessions.sort_by_key(|s| s.created_at());
        Ok(sessions)
    }

    fn flush(&self) -> Result<(), StoreError> {
        let entries: Vec<Arc<Mutex<Entry>>> =
            self.entries.lock().unwrap().values().cloned().collect();
        for entry in entries {
            let mut state = entry.lock().unwrap();
            if let Some(pending) = state.pending.take() {
                self.write_record(&pending)?;
                state.last_write = Some(Instant::now());
                state.written_status = Some(pending.status());
            }
        }
        Ok(())
    }
}
