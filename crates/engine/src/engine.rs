use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use mediaferry_ingest::IngestEndpoint;
use mediaferry_protocol::{FailureReason, UploadMetadata, UploadStatus};
use mediaferry_session_store::{SessionStore, StoreError};
use mediaferry_transfer::{TransferError, UploadSession, UploadSource, validate_metadata};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handle::UploadHandle;
use crate::runner::RunMode;
use crate::{EngineConfig, EngineError};

/// Caller-supplied metadata check run before any resource is created.
pub type MetadataValidator = dyn Fn(&UploadMetadata) -> Result<(), String> + Send + Sync;

/// Collaborators shared by the engine, its handles and their runners.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) endpoint: Arc<dyn IngestEndpoint>,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) config: Arc<EngineConfig>,
}

impl Context {
    /// Runs a store call on the blocking pool.
    pub(crate) async fn blocking<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SessionStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?
            .map_err(EngineError::from)
    }

    /// Saves the record. Failures are logged; the next confirmed chunk
    /// persists again.
    pub(crate) async fn persist(&self, session: UploadSession) {
        let id = session.id().to_string();
        match self.blocking(move |store| store.save(&session)).await {
            Ok(()) => debug!(session = %id, "session persisted"),
            Err(e) => warn!(session = %id, error = %e, "failed to persist session"),
        }
    }

    /// Deletes the record, logging failures.
    pub(crate) async fn forget(&self, id: &str) {
        let owned = id.to_string();
        if let Err(e) = self.blocking(move |store| store.delete(&owned)).await {
            warn!(session = %id, error = %e, "failed to delete session record");
        }
    }

    /// Best-effort release of a remote resource. Never fails.
    pub(crate) async fn release(&self, id: &str, handle: &str) {
        let request = self.endpoint.release(handle);
        match tokio::time::timeout(self.config.request_timeout, request).await {
            Ok(Ok(())) => debug!(session = %id, "remote resource released"),
            Ok(Err(e)) => warn!(session = %id, error = %e, "failed to release remote resource"),
            Err(_) => warn!(session = %id, "timed out releasing remote resource"),
        }
    }
}

/// Marks a session id as driven by a live handle in this engine.
pub(crate) struct ActiveGuard {
    id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl ActiveGuard {
    fn acquire(active: &Arc<Mutex<HashSet<String>>>, id: &str) -> Result<Self, EngineError> {
        if !active.lock().unwrap().insert(id.to_string()) {
            return Err(EngineError::AlreadyActive(id.to_string()));
        }
        Ok(Self {
            id: id.to_string(),
            active: Arc::clone(active),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().unwrap().remove(&self.id);
    }
}

/// Creates and resumes uploads against one ingest endpoint and store.
///
/// Must be used from within a Tokio runtime; every session runs on its
/// own task.
pub struct UploadEngine {
    ctx: Context,
    validator: Option<Arc<MetadataValidator>>,
    active: Arc<Mutex<HashSet<String>>>,
}

impl UploadEngine {
    pub fn new(
        endpoint: Arc<dyn IngestEndpoint>,
        store: Arc<dyn SessionStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ctx: Context {
                endpoint,
                store,
                config: Arc::new(config),
            },
            validator: None,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Installs an extra metadata check applied by [`start`](Self::start).
    pub fn with_validator(
        mut self,
        validator: impl Fn(&UploadMetadata) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Starts a new upload of `source`.
    ///
    /// Returns immediately with the session `idle`; resource creation and
    /// the transfer run in the background.
    pub fn start(
        &self,
        source: Box<dyn UploadSource>,
        metadata: UploadMetadata,
    ) -> Result<UploadHandle, EngineError> {
        validate_metadata(&metadata).map_err(|e| match e {
            TransferError::InvalidMetadata(msg) => EngineError::InvalidMetadata(msg),
            other => EngineError::Transfer(other),
        })?;
        if let Some(validator) = &self.validator {
            validator(&metadata).map_err(EngineError::InvalidMetadata)?;
        }

        let id = Uuid::new_v4().to_string();
        let guard = ActiveGuard::acquire(&self.active, &id)?;
        let session = UploadSession::new(id.clone(), source.total_bytes(), metadata);
        info!(session = %id, total_bytes = session.total_bytes(), "starting upload");

        Ok(UploadHandle::spawn(
            self.ctx.clone(),
            session,
            source,
            RunMode::Create,
            guard,
        ))
    }

    /// Continues a persisted session from the server's committed offset.
    pub async fn resume(
        &self,
        id: &str,
        source: Box<dyn UploadSource>,
    ) -> Result<UploadHandle, EngineError> {
        let guard = ActiveGuard::acquire(&self.active, id)?;
        let mut session = self
            .load(id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))?;

        if session.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: session.status(),
                op: "resume",
            });
        }
        if !session.is_resumable() {
            return Err(EngineError::RestartRequired(restart_reason(&session)));
        }
        if source.total_bytes() != session.total_bytes() {
            return Err(EngineError::SourceMismatch {
                expected: session.total_bytes(),
                actual: source.total_bytes(),
            });
        }

        session.set_status(UploadStatus::Uploading);
        info!(
            session = %id,
            committed = session.committed_bytes(),
            total_bytes = session.total_bytes(),
            "resuming upload"
        );
        Ok(UploadHandle::spawn(
            self.ctx.clone(),
            session,
            source,
            RunMode::Reconcile,
            guard,
        ))
    }

    /// Every persisted session record, oldest first.
    pub async fn sessions(&self) -> Result<Vec<UploadSession>, EngineError> {
        self.ctx.blocking(|store| store.list_all()).await
    }

    /// Persisted sessions that [`resume`](Self::resume) would accept,
    /// excluding those with a live handle.
    pub async fn resumable_sessions(&self) -> Result<Vec<UploadSession>, EngineError> {
        let sessions = self.sessions().await?;
        let active = self.active.lock().unwrap();
        Ok(sessions
            .into_iter()
            .filter(|s| s.is_resumable() && !active.contains(s.id()))
            .collect())
    }

    /// Deletes records untouched for longer than `max_age`, releasing their
    /// remote resources. Returns the evicted ids.
    pub async fn evict_stale(&self, max_age: Duration) -> Result<Vec<String>, EngineError> {
        let now = Utc::now();
        let mut evicted = Vec::new();

        for session in self.sessions().await? {
            let age = now
                .signed_duration_since(session.updated_at())
                .to_std()
                .unwrap_or_default();
            if age <= max_age {
                continue;
            }
            let Ok(_guard) = ActiveGuard::acquire(&self.active, session.id()) else {
                continue;
            };
            if let Some(handle) = session.resource_handle() {
                self.ctx.release(session.id(), handle).await;
            }
            let id = session.id().to_string();
            let owned = id.clone();
            self.ctx.blocking(move |store| store.delete(&owned)).await?;
            debug!(session = %id, age_secs = age.as_secs(), "evicted stale session");
            evicted.push(id);
        }

        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted stale sessions");
        }
        Ok(evicted)
    }

    /// Cancels a persisted session that has no live handle: releases the
    /// remote resource and deletes the record.
    pub async fn discard(&self, id: &str) -> Result<(), EngineError> {
        let _guard = ActiveGuard::acquire(&self.active, id)?;
        let session = self
            .load(id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))?;

        if let Some(handle) = session.resource_handle() {
            self.ctx.release(id, handle).await;
        }
        let owned = id.to_string();
        self.ctx.blocking(move |store| store.delete(&owned)).await?;
        info!(session = %id, "session discarded");
        Ok(())
    }

    /// Writes out any saves the store deferred.
    pub async fn flush(&self) -> Result<(), EngineError> {
        self.ctx.blocking(|store| store.flush()).await
    }

    async fn load(&self, id: &str) -> Result<Option<UploadSession>, EngineError> {
        let owned = id.to_string();
        self.ctx.blocking(move |store| store.load(&owned)).await
    }
}

/// Reason reported when a session cannot be resumed.
pub(crate) fn restart_reason(session: &UploadSession) -> FailureReason {
    session
        .last_error()
        .map(|e| e.reason)
        .filter(|reason| !reason.is_resumable())
        .unwrap_or(FailureReason::CreateFailed)
}
