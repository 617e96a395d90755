use std::sync::{Arc, Mutex};

use mediaferry_protocol::{UploadSnapshot, UploadStatus};
use mediaferry_transfer::UploadSession;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::EngineError;
use crate::engine::{ActiveGuard, Context, restart_reason};
use crate::runner::{BoxedSource, RunMode, Runner};
use crate::state::Shared;

struct Task {
    cancel: CancellationToken,
    join: JoinHandle<Option<BoxedSource>>,
}

/// The running transfer task, or the parked source when none runs.
#[derive(Default)]
struct Control {
    task: Option<Task>,
    source: Option<BoxedSource>,
}

/// Controls one active upload session.
///
/// Control operations are serialized; snapshots can be read at any time.
/// Dropping the handle stops the transfer and leaves the persisted record
/// resumable.
pub struct UploadHandle {
    id: String,
    ctx: Context,
    shared: Arc<Shared>,
    control: tokio::sync::Mutex<Control>,
    events_rx: Mutex<Option<mpsc::Receiver<UploadSnapshot>>>,
    root: CancellationToken,
    active: Arc<ActiveGuard>,
}

impl UploadHandle {
    pub(crate) fn spawn(
        ctx: Context,
        session: UploadSession,
        source: BoxedSource,
        mode: RunMode,
        active: ActiveGuard,
    ) -> Self {
        let id = session.id().to_string();
        let (shared, events_rx) = Shared::new(session, &ctx.config);
        let mut handle = Self {
            id,
            ctx,
            shared,
            control: tokio::sync::Mutex::new(Control::default()),
            events_rx: Mutex::new(Some(events_rx)),
            root: CancellationToken::new(),
            active: Arc::new(active),
        };
        handle.shared.emit();
        let task = handle.launch(source, mode);
        handle.control.get_mut().task = Some(task);
        handle
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> UploadStatus {
        self.shared.status()
    }

    /// Latest progress and state.
    pub fn snapshot(&self) -> UploadSnapshot {
        self.shared.snapshot()
    }

    /// Takes the snapshot event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<UploadSnapshot>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Subscribes to the most recent snapshot.
    pub fn watch(&self) -> watch::Receiver<UploadSnapshot> {
        self.shared.subscribe()
    }

    /// Waits until the session is no longer transferring and returns its
    /// snapshot.
    pub async fn wait(&self) -> UploadSnapshot {
        let mut rx = self.shared.subscribe();
        match rx.wait_for(|s| is_settled(s.status)).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.shared.snapshot(),
        }
    }

    /// Stops the transfer, keeping every confirmed byte.
    pub async fn pause(&self) -> Result<(), EngineError> {
        let mut control = self.control.lock().await;
        self.expect_status(UploadStatus::Uploading, "pause")?;

        self.stop(&mut control).await;
        // The run may have settled on its own before it saw the cancellation.
        self.expect_status(UploadStatus::Uploading, "pause")?;

        let session = self.shared.with_session(|s| {
            s.set_status(UploadStatus::Paused);
            s.clone()
        });
        self.shared.pause_estimator();
        self.ctx.persist(session.clone()).await;
        self.shared.emit();
        info!(session = %self.id, committed = session.committed_bytes(), "upload paused");
        Ok(())
    }

    /// Continues a paused upload from the server's offset. A no-op while
    /// already uploading.
    pub async fn resume(&self) -> Result<(), EngineError> {
        let mut control = self.control.lock().await;
        match self.shared.status() {
            UploadStatus::Uploading => return Ok(()),
            UploadStatus::Paused => {}
            from => return Err(EngineError::InvalidTransition { from, op: "resume" }),
        }
        self.restart(&mut control).await?;
        info!(session = %self.id, "upload resumed");
        Ok(())
    }

    /// Continues a failed upload whose failure is resumable.
    pub async fn retry(&self) -> Result<(), EngineError> {
        let mut control = self.control.lock().await;
        self.expect_status(UploadStatus::Failed, "retry")?;

        let session = self.shared.session();
        if !session.is_resumable() {
            return Err(EngineError::RestartRequired(restart_reason(&session)));
        }
        self.restart(&mut control).await?;
        info!(session = %self.id, "retrying upload");
        Ok(())
    }

    /// Stops the upload for good, releasing the remote resource and the
    /// persisted record.
    pub async fn cancel(&self) -> Result<(), EngineError> {
        let mut control = self.control.lock().await;
        let from = self.shared.status();
        if from.is_terminal() {
            return Err(EngineError::InvalidTransition { from, op: "cancel" });
        }

        self.stop(&mut control).await;
        let now = self.shared.status();
        if now.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: now,
                op: "cancel",
            });
        }
        control.source = None;

        let handle = self
            .shared
            .with_session(|s| s.resource_handle().map(str::to_string));
        if let Some(handle) = handle {
            self.ctx.release(&self.id, &handle).await;
        }
        self.ctx.forget(&self.id).await;

        self.shared
            .with_session(|s| s.set_status(UploadStatus::Cancelled));
        self.shared.pause_estimator();
        self.shared.emit();
        info!(session = %self.id, "upload cancelled");
        Ok(())
    }

    fn expect_status(&self, expected: UploadStatus, op: &'static str) -> Result<(), EngineError> {
        let from = self.shared.status();
        if from == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition { from, op })
        }
    }

    /// Relaunches the transfer with offset reconciliation.
    async fn restart(&self, control: &mut Control) -> Result<(), EngineError> {
        self.stop(control).await;
        let source = control.source.take().ok_or(EngineError::SourceUnavailable)?;
        self.shared
            .with_session(|s| s.set_status(UploadStatus::Uploading));
        self.shared.emit();
        control.task = Some(self.launch(source, RunMode::Reconcile));
        Ok(())
    }

    fn launch(&self, source: BoxedSource, mode: RunMode) -> Task {
        let cancel = self.root.child_token();
        let runner = Runner {
            id: self.id.clone(),
            shared: Arc::clone(&self.shared),
            ctx: self.ctx.clone(),
            cancel: cancel.clone(),
            source: Mutex::new(Some(source)),
            _active: Arc::clone(&self.active),
        };
        Task {
            cancel,
            join: tokio::spawn(runner.run(mode)),
        }
    }

    /// Cancels the running task, if any, and takes the source back.
    async fn stop(&self, control: &mut Control) {
        let Some(task) = control.task.take() else {
            return;
        };
        task.cancel.cancel();
        match task.join.await {
            Ok(Some(source)) => control.source = Some(source),
            Ok(None) => warn!(session = %self.id, "transfer task lost the byte source"),
            Err(e) => warn!(session = %self.id, error = %e, "transfer task ended abnormally"),
        }
    }
}

impl Drop for UploadHandle {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Returns `true` once no transfer is in progress.
fn is_settled(status: UploadStatus) -> bool {
    !matches!(status, UploadStatus::Idle | UploadStatus::Uploading)
}
