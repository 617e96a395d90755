//! Background task that drives one session's transfer.
//!
//! The runner owns every status change while it is alive. A handle stops it
//! by cancelling its token and joining the task, which hands the byte
//! source back.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use mediaferry_ingest::{ChunkOutcome, IngestError, IngestFuture};
use mediaferry_protocol::{FailureReason, SessionError, UploadStatus};
use mediaferry_transfer::{ErrorClass, UploadSource};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::engine::{ActiveGuard, Context};
use crate::state::Shared;

pub(crate) type BoxedSource = Box<dyn UploadSource>;

/// How a run begins before entering the chunk loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// Allocate the remote resource first.
    Create,
    /// Re-query the server offset and reconcile the local cursor.
    Reconcile,
}

/// Why a run stopped short of completion.
enum Stop {
    Cancelled,
    Failed(SessionError),
}

fn fatal(reason: FailureReason, message: impl Into<String>) -> Stop {
    Stop::Failed(SessionError::new(reason, message))
}

pub(crate) struct Runner {
    pub(crate) id: String,
    pub(crate) shared: Arc<Shared>,
    pub(crate) ctx: Context,
    pub(crate) cancel: CancellationToken,
    /// Held in a lock only so the runner is `Sync`; never contended.
    pub(crate) source: Mutex<Option<BoxedSource>>,
    pub(crate) _active: Arc<ActiveGuard>,
}

impl Runner {
    /// Drives the session until it completes, fails or is cancelled.
    /// Returns the byte source unless it was lost to a panicked read.
    pub(crate) async fn run(self, mode: RunMode) -> Option<BoxedSource> {
        match self.drive(mode).await {
            Ok(()) => self.finish().await,
            Err(Stop::Cancelled) => debug!(session = %self.id, "transfer interrupted"),
            Err(Stop::Failed(error)) => self.fail(error).await,
        }
        self.source.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    async fn drive(&self, mode: RunMode) -> Result<(), Stop> {
        match mode {
            RunMode::Create => self.create().await?,
            RunMode::Reconcile => self.reconcile().await?,
        }
        self.transfer_all().await
    }

    async fn create(&self) -> Result<(), Stop> {
        let (total, metadata) = self
            .shared
            .with_session(|s| (s.total_bytes(), s.metadata().clone()));

        let mut failures = 0;
        let created = loop {
            match self.call(self.ctx.endpoint.create(total, &metadata)).await? {
                Ok(created) => break created,
                Err(e) => {
                    self.on_ingest_error(&mut failures, &e)
                        .await
                        .map_err(|stop| match stop {
                            Stop::Failed(err) => fatal(FailureReason::CreateFailed, err.message),
                            other => other,
                        })?;
                }
            }
        };

        if created.committed_bytes > total {
            return Err(fatal(
                FailureReason::CreateFailed,
                format!(
                    "new resource reports {} of {total} bytes",
                    created.committed_bytes
                ),
            ));
        }
        self.shared.with_session(|s| {
            s.attach_resource(created.handle.clone());
            s.clear_error();
            s.set_status(UploadStatus::Uploading);
        });
        self.adopt_offset(created.committed_bytes)?;
        self.ctx.persist(self.shared.session()).await;
        self.shared.emit();
        info!(
            session = %self.id,
            handle = %created.handle,
            total_bytes = total,
            "upload resource created"
        );
        Ok(())
    }

    async fn reconcile(&self) -> Result<(), Stop> {
        let handle = self.resource_handle()?;
        let server = self.query_offset(&handle).await?;
        self.adopt_offset(server)?;
        self.ctx.persist(self.shared.session()).await;
        self.shared.emit();
        info!(session = %self.id, offset = server, "resuming from server offset");
        Ok(())
    }

    /// Queries the authoritative offset, retrying transient failures.
    async fn query_offset(&self, handle: &str) -> Result<u64, Stop> {
        let mut failures = 0;
        loop {
            match self.call(self.ctx.endpoint.query_offset(handle)).await? {
                Ok(offset) => return Ok(offset),
                Err(e) => self.on_ingest_error(&mut failures, &e).await?,
            }
        }
    }

    /// Sends windows sequentially until every byte is committed.
    async fn transfer_all(&self) -> Result<(), Stop> {
        let handle = self.resource_handle()?;
        let chunk_size = self.ctx.config.chunk_size.max(1) as u64;
        let mut failures = 0;

        loop {
            let (offset, remaining) = self
                .shared
                .with_session(|s| (s.committed_bytes(), s.remaining_bytes()));
            if remaining == 0 {
                return Ok(());
            }

            let len = remaining.min(chunk_size) as usize;
            let data = Bytes::from(self.read_window(offset, len).await?);
            let window_end = offset + data.len() as u64;

            // Attempts on this window until the server confirms progress.
            loop {
                let request = self.ctx.endpoint.transfer_chunk(&handle, offset, data.clone());
                let outcome = self.call(request).await?;
                let progressed = match outcome {
                    Ok(ChunkOutcome::Committed(server)) => {
                        if server > window_end {
                            return Err(fatal(
                                FailureReason::ProtocolViolation,
                                format!(
                                    "server confirmed {server} bytes for a window ending at {window_end}"
                                ),
                            ));
                        }
                        self.adopt_offset(server)?
                    }
                    Ok(ChunkOutcome::OffsetConflict) => {
                        debug!(session = %self.id, offset, "offset conflict, re-querying");
                        match self.call(self.ctx.endpoint.query_offset(&handle)).await? {
                            Ok(server) => self.adopt_offset(server)?,
                            Err(e) => {
                                self.on_ingest_error(&mut failures, &e).await?;
                                continue;
                            }
                        }
                    }
                    Err(e) => {
                        self.on_ingest_error(&mut failures, &e).await?;
                        continue;
                    }
                };

                if progressed {
                    failures = 0;
                    let committed = self.shared.with_session(|s| {
                        s.clear_error();
                        s.committed_bytes()
                    });
                    self.ctx.persist(self.shared.session()).await;
                    self.shared.sample(Instant::now().into_std());
                    debug!(session = %self.id, offset, committed, "chunk committed");
                    break;
                }

                self.on_attempt_failed(
                    &mut failures,
                    ErrorClass::Retryable,
                    SessionError::new(FailureReason::Transient, "server acknowledged no progress"),
                )
                .await?;
            }
        }
    }

    /// Applies a server-reported offset to the local cursor.
    ///
    /// Returns whether the cursor moved. An offset behind the cursor is a
    /// rollback; one past the end breaks the contract.
    fn adopt_offset(&self, server: u64) -> Result<bool, Stop> {
        self.shared.with_session(|s| {
            let committed = s.committed_bytes();
            if server < committed {
                return Err(fatal(
                    FailureReason::OffsetRollback,
                    format!(
                        "server reports {server} bytes but {committed} were already confirmed"
                    ),
                ));
            }
            s.advance_to(server)
                .map_err(|e| fatal(FailureReason::ProtocolViolation, e.to_string()))?;
            Ok(server > committed)
        })
    }

    async fn on_ingest_error(&self, failures: &mut u32, err: &IngestError) -> Result<(), Stop> {
        let (class, reason) = classify(err);
        self.on_attempt_failed(failures, class, SessionError::new(reason, err.to_string()))
            .await
    }

    /// Counts a failed attempt and waits out its backoff, or returns the
    /// terminal error when the failure is fatal or the budget is spent.
    async fn on_attempt_failed(
        &self,
        failures: &mut u32,
        class: ErrorClass,
        error: SessionError,
    ) -> Result<(), Stop> {
        if class == ErrorClass::Fatal {
            return Err(Stop::Failed(error));
        }
        let retry = *failures;
        *failures += 1;
        let Some(delay) = self.ctx.config.retry.next_delay(retry, class) else {
            return Err(fatal(
                FailureReason::RetriesExhausted,
                format!("gave up after {failures} attempts: {}", error.message),
            ));
        };

        warn!(
            session = %self.id,
            attempt = *failures,
            delay_ms = delay.as_millis() as u64,
            error = %error.message,
            "attempt failed, retrying"
        );
        self.shared.with_session(|s| s.record_error(error));
        self.shared.emit();
        self.backoff(delay).await
    }

    /// Runs one endpoint call under the request deadline, racing
    /// cancellation. Expiry becomes [`IngestError::Timeout`].
    async fn call<T>(&self, fut: IngestFuture<'_, T>) -> Result<Result<T, IngestError>, Stop> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stop::Cancelled),
            res = tokio::time::timeout(self.ctx.config.request_timeout, fut) => {
                Ok(res.unwrap_or_else(|_| Err(IngestError::Timeout)))
            }
        }
    }

    async fn backoff(&self, delay: Duration) -> Result<(), Stop> {
        if delay.is_zero() {
            return if self.cancel.is_cancelled() {
                Err(Stop::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stop::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Reads one window on the blocking pool. The source travels into the
    /// closure and back.
    async fn read_window(&self, offset: u64, len: usize) -> Result<Vec<u8>, Stop> {
        let Some(mut source) = self.source.lock().unwrap().take() else {
            return Err(fatal(FailureReason::SourceUnreadable, "byte source unavailable"));
        };
        let joined = tokio::task::spawn_blocking(move || {
            let result = source.read_window(offset, len);
            (source, result)
        })
        .await;

        let (source, result) = joined.map_err(|e| {
            fatal(FailureReason::SourceUnreadable, format!("read task failed: {e}"))
        })?;
        *self.source.lock().unwrap() = Some(source);

        let data = result.map_err(|e| fatal(FailureReason::SourceUnreadable, e.to_string()))?;
        if data.len() != len {
            return Err(fatal(
                FailureReason::SourceUnreadable,
                format!(
                    "source ended at {} while reading {len} bytes at {offset}",
                    offset + data.len() as u64
                ),
            ));
        }
        Ok(data)
    }

    fn resource_handle(&self) -> Result<String, Stop> {
        self.shared
            .with_session(|s| s.resource_handle().map(str::to_string))
            .ok_or_else(|| fatal(FailureReason::CreateFailed, "session has no remote resource"))
    }

    async fn finish(&self) {
        let completed = self.shared.with_session(|s| s.complete());
        if let Err(e) = completed {
            self.fail(SessionError::new(FailureReason::ProtocolViolation, e.to_string()))
                .await;
            return;
        }
        self.ctx.forget(&self.id).await;
        self.shared.emit();
        info!(session = %self.id, "upload completed");
    }

    async fn fail(&self, error: SessionError) {
        warn!(
            session = %self.id,
            reason = %error.reason,
            error = %error.message,
            "upload failed"
        );
        self.shared.with_session(|s| {
            s.record_error(error);
            s.set_status(UploadStatus::Failed);
        });
        self.shared.pause_estimator();
        self.ctx.persist(self.shared.session()).await;
        self.shared.emit();
    }
}
