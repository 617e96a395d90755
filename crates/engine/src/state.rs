//! Session state shared between a handle and its transfer task.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use mediaferry_protocol::{UploadSnapshot, UploadStatus};
use mediaferry_transfer::{Throughput, ThroughputEstimator, UploadSession};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::EngineConfig;

struct State {
    session: UploadSession,
    estimator: ThroughputEstimator,
}

/// In-memory session record plus the channels its snapshots go out on.
///
/// The lock is never held across an await point.
pub(crate) struct Shared {
    state: Mutex<State>,
    snapshot_tx: watch::Sender<UploadSnapshot>,
    events_tx: mpsc::Sender<UploadSnapshot>,
}

impl Shared {
    pub(crate) fn new(
        session: UploadSession,
        config: &EngineConfig,
    ) -> (Arc<Self>, mpsc::Receiver<UploadSnapshot>) {
        let estimator = ThroughputEstimator::new(session.total_bytes(), config.sample_interval);
        let (snapshot_tx, _) = watch::channel(session.snapshot(Throughput::default()));
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let shared = Arc::new(Self {
            state: Mutex::new(State { session, estimator }),
            snapshot_tx,
            events_tx,
        });
        (shared, events_rx)
    }

    /// Runs `f` against the session record.
    pub(crate) fn with_session<R>(&self, f: impl FnOnce(&mut UploadSession) -> R) -> R {
        f(&mut self.state.lock().unwrap().session)
    }

    /// Returns a copy of the session record.
    pub(crate) fn session(&self) -> UploadSession {
        self.state.lock().unwrap().session.clone()
    }

    pub(crate) fn status(&self) -> UploadStatus {
        self.state.lock().unwrap().session.status()
    }

    pub(crate) fn snapshot(&self) -> UploadSnapshot {
        let state = self.state.lock().unwrap();
        state.session.snapshot(state.estimator.current())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Publishes the current snapshot to the watch and event channels.
    ///
    /// Never blocks the transfer: a full event channel drops the snapshot.
    pub(crate) fn emit(&self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_replace(snapshot.clone());
        if let Err(TrySendError::Full(dropped)) = self.events_tx.try_send(snapshot) {
            warn!(
                session = %dropped.session_id,
                committed = dropped.committed_bytes,
                "event channel full, snapshot dropped"
            );
        }
    }

    /// Feeds the committed offset to the estimator and emits when a new
    /// sample was taken.
    pub(crate) fn sample(&self, at: Instant) {
        let sampled = {
            let mut state = self.state.lock().unwrap();
            let committed = state.session.committed_bytes();
            state.estimator.record(committed, at).is_some()
        };
        if sampled {
            self.emit();
        }
    }

    /// Drops the estimator window so a paused gap does not skew the speed.
    pub(crate) fn pause_estimator(&self) {
        self.state.lock().unwrap().estimator.pause();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use mediaferry_protocol::UploadMetadata;

    fn shared(event_buffer: usize) -> (Arc<Shared>, mpsc::Receiver<UploadSnapshot>) {
        let config = EngineConfig {
            event_buffer,
            ..EngineConfig::default()
        };
        let session = UploadSession::new("s1".into(), 1000, UploadMetadata::new());
        Shared::new(session, &config)
    }

    #[test]
    fn emit_updates_watch_and_events() {
        let (shared, mut events) = shared(8);
        let watch = shared.subscribe();

        shared.with_session(|s| {
            s.attach_resource("r".into());
            s.advance_to(250).unwrap();
            s.set_status(UploadStatus::Uploading);
        });
        shared.emit();

        let event = events.try_recv().unwrap();
        assert_eq!(event.committed_bytes, 250);
        assert_eq!(event.status, UploadStatus::Uploading);
        assert_eq!(*watch.borrow(), event);
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (shared, mut events) = shared(1);
        shared.emit();
        shared.emit();
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn sampling_is_throttled() {
        let (shared, mut events) = shared(8);
        let t0 = Instant::now();

        shared.sample(t0);
        assert!(events.try_recv().is_ok(), "first sample seeds and emits");

        shared.with_session(|s| {
            s.attach_resource("r".into());
            s.advance_to(100).unwrap();
        });
        shared.sample(t0 + Duration::from_millis(200));
        assert!(events.try_recv().is_err(), "inside the interval");

        shared.sample(t0 + Duration::from_secs(1));
        let event = events.try_recv().unwrap();
        assert_eq!(event.speed_bytes_per_second, 100.0);
        assert_eq!(event.estimated_seconds_remaining, Some(9.0));
    }
}
