//! Debounced persistence of character edits.
//!
//! Edits are sent as snapshots over a bounded channel to a single writer
//! task. The writer coalesces bursts (trailing edge, latest snapshot wins)
//! and suppresses everything sent while a host-pushed change is being
//! applied, so hydration never echoes back to the host.

use crate::host::{CharacterData, HostBridge};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Quiet period before a burst of edits is written.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(800);

/// Where the writer is in its write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    PendingWrite,
    Writing,
}

#[derive(Debug)]
pub enum SyncMessage {
    /// The character changed locally.
    Mutated(CharacterData),
    /// A host-pushed change is about to be applied.
    BeginHydration,
    EndHydration,
    /// Write any pending snapshot now and acknowledge.
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Persistence writer has stopped")]
    Closed,
}

/// Sending side of the persistence writer.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    sender: mpsc::Sender<SyncMessage>,
    state: watch::Receiver<SyncState>,
}

impl SyncHandle {
    /// Spawn a writer on the current runtime.
    ///
    /// The task exits once every handle is dropped, writing any pending
    /// snapshot first.
    pub fn spawn(
        host: Arc<dyn HostBridge>,
        debounce: Duration,
        capacity: usize,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (state_tx, state) = watch::channel(SyncState::Idle);
        let writer = PersistenceWriter {
            host,
            debounce,
            receiver,
            state: state_tx,
            pending: None,
            hydrating: 0,
        };
        let task = tokio::spawn(writer.run());
        (SyncHandle { sender, state }, task)
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub async fn notify(&self, snapshot: CharacterData) -> Result<(), SyncError> {
        self.send(SyncMessage::Mutated(snapshot)).await
    }

    pub async fn begin_hydration(&self) -> Result<(), SyncError> {
        self.send(SyncMessage::BeginHydration).await
    }

    pub async fn end_hydration(&self) -> Result<(), SyncError> {
        self.send(SyncMessage::EndHydration).await
    }

    /// Write any pending snapshot without waiting for the debounce.
    pub async fn flush(&self) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.send(SyncMessage::Flush(tx)).await?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    async fn send(&self, message: SyncMessage) -> Result<(), SyncError> {
        self.sender.send(message).await.map_err(|_| SyncError::Closed)
    }
}

struct Pending {
    snapshot: CharacterData,
    deadline: Instant,
}

/// The single task that writes characters to the host.
pub struct PersistenceWriter {
    host: Arc<dyn HostBridge>,
    debounce: Duration,
    receiver: mpsc::Receiver<SyncMessage>,
    state: watch::Sender<SyncState>,
    pending: Option<Pending>,
    /// Nesting depth of host-pushed changes being applied.
    hydrating: usize,
}

impl PersistenceWriter {
    pub async fn run(mut self) {
        debug!(debounce_ms = self.debounce.as_millis() as u64, "Persistence writer started");

        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => {
                        self.write_pending().await;
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.write_pending().await;
                }
            }
        }

        debug!("Persistence writer stopped");
    }

    async fn handle(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::Mutated(snapshot) => {
                if self.hydrating > 0 {
                    debug!("Ignoring mutation during hydration");
                    return;
                }
                self.pending = Some(Pending {
                    snapshot,
                    deadline: Instant::now() + self.debounce,
                });
                self.set_state(SyncState::PendingWrite);
            }
            SyncMessage::BeginHydration => {
                self.hydrating += 1;
                // The incoming host state supersedes unsaved local edits
                if self.pending.take().is_some() {
                    debug!("Discarding pending write superseded by host change");
                    self.set_state(SyncState::Idle);
                }
            }
            SyncMessage::EndHydration => {
                if self.hydrating == 0 {
                    warn!("Hydration ended without a matching begin");
                }
                self.hydrating = self.hydrating.saturating_sub(1);
            }
            SyncMessage::Flush(ack) => {
                self.write_pending().await;
                let _ = ack.send(());
            }
        }
    }

    async fn write_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        self.set_state(SyncState::Writing);
        let name = pending.snapshot.name.clone();
        match self.host.update_character(pending.snapshot).await {
            Ok(()) => debug!(character = %name, "Character persisted"),
            Err(e) => warn!(character = %name, error = %e, "Failed to persist character"),
        }
        self.set_state(SyncState::Idle);
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;
    use tokio::time::sleep;

    fn snapshot(name: &str) -> CharacterData {
        CharacterData {
            name: name.to_string(),
            ..CharacterData::default()
        }
    }

    fn spawn(host: &Arc<MockHost>) -> (SyncHandle, JoinHandle<()>) {
        SyncHandle::spawn(host.clone(), DEFAULT_DEBOUNCE, 16)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_latest_snapshot() {
        let host = Arc::new(MockHost::new());
        let (sync, _task) = spawn(&host);

        for i in 0..5 {
            sync.notify(snapshot(&format!("edit {i}"))).await.unwrap();
        }
        sleep(Duration::from_millis(100)).await;
        assert_eq!(sync.state(), SyncState::PendingWrite);
        host.assert_updates(0);

        sleep(Duration::from_millis(800)).await;
        host.assert_updates(1);
        assert_eq!(host.last_update().unwrap().name, "edit 4");
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_edit_restarts_the_quiet_period() {
        let host = Arc::new(MockHost::new());
        let (sync, _task) = spawn(&host);

        sync.notify(snapshot("a")).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        sync.notify(snapshot("b")).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        host.assert_updates(0);

        sleep(Duration::from_millis(400)).await;
        host.assert_updates(1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hydration_does_not_echo() {
        let host = Arc::new(MockHost::new());
        let (sync, _task) = spawn(&host);

        sync.begin_hydration().await.unwrap();
        sync.notify(snapshot("from host")).await.unwrap();
        sync.end_hydration().await.unwrap();
        sleep(Duration::from_secs(2)).await;
        host.assert_updates(0);

        sync.notify(snapshot("local")).await.unwrap();
        sync.flush().await.unwrap();
        host.assert_updates(1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_change_supersedes_pending_edit() {
        let host = Arc::new(MockHost::new());
        let (sync, _task) = spawn(&host);

        sync.notify(snapshot("stale")).await.unwrap();
        sync.begin_hydration().await.unwrap();
        sync.end_hydration().await.unwrap();
        sleep(Duration::from_secs(2)).await;
        host.assert_updates(0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately() {
        let host = Arc::new(MockHost::new());
        let (sync, _task) = spawn(&host);

        sync.notify(snapshot("now")).await.unwrap();
        sync.flush().await.unwrap();
        host.assert_updates(1);

        // Nothing pending, nothing written
        sync.flush().await.unwrap();
        host.assert_updates(1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_writes_pending_and_exits() {
        let host = Arc::new(MockHost::new());
        let (sync, task) = spawn(&host);

        sync.notify(snapshot("last words")).await.unwrap();
        drop(sync);
        task.await.unwrap();
        assert_eq!(host.last_update().unwrap().name, "last words");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_not_retried() {
        let host = Arc::new(MockHost::new());
        host.set_offline(true);
        let (sync, _task) = spawn(&host);

        sync.notify(snapshot("lost")).await.unwrap();
        sync.flush().await.unwrap();
        assert_eq!(sync.state(), SyncState::Idle);

        host.set_offline(false);
        sleep(Duration::from_secs(2)).await;
        host.assert_updates(0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_writer_reports_closed() {
        let host = Arc::new(MockHost::new());
        let (sync, task) = spawn(&host);
        task.abort();
        let _ = task.await;

        assert_eq!(sync.notify(snapshot("x")).await, Err(SyncError::Closed));
    }
}
