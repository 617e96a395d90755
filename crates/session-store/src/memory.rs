use std::collections::HashMap;
use std::sync::RwLock;

use mediaferry_transfer::UploadSession;

use crate::{SessionStore, StoreError};

/// In-process session store. Records do not survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, UploadSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, session: &UploadSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .unwrap()
            .insert(session.id().to_string(), session.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<UploadSession>, StoreError> {
        Ok(self.sessions.read().unwrap().get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.write().unwrap().remove(id);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<UploadSession>, StoreError> {
        let mut sessions: Vec<UploadSession> =
            self.sessions.read().unwrap().values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at());
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaferry_protocol::UploadMetadata;

    #[test]
    fn save_load_delete() {
        let store = MemoryStore::new();
        let session = UploadSession::new("s1".into(), 10, UploadMetadata::new());
        store.save(&session).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("s1").unwrap().unwrap(), session);

        store.delete("s1").unwrap();
        assert!(store.is_empty());
        assert!(store.load("s1").unwrap().is_none());
    }

    #[test]
    fn list_all_returns_every_record() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store
                .save(&UploadSession::new(id.into(), 1, UploadMetadata::new()))
                .unwrap();
        }
        let mut ids: Vec<String> = store
            .list_all()
            .unwrap()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
