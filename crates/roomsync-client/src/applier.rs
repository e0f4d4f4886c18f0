//! Single dispatch point for pushed backend events.

use std::sync::Arc;

use roomsync_core::{GlobalStore, PushEvent, decode_envelope};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Decodes pushed frames and routes them to the matching store mutation.
#[derive(Debug, Clone)]
pub struct SyncApplier {
    store: Arc<GlobalStore>,
}

/// Handle to a running applier loop.
#[derive(Debug)]
pub struct ApplierTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ApplierTask {
    /// Stop the loop and wait for it to exit. Frames still queued are dropped.
    pub async fn shutdown(self) {
        self.stop.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "sync applier task ended abnormally");
        }
    }

    /// Wait for the loop to exit on its own, after every sender is gone.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!(error = %err, "sync applier task ended abnormally");
        }
    }
}

impl SyncApplier {
    pub fn new(store: Arc<GlobalStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<GlobalStore> {
        &self.store
    }

    /// Decode and apply one raw frame.
    ///
    /// Undecodable frames are logged and dropped. Returns whether the frame was applied.
    pub fn handle_frame(&self, frame: &str) -> bool {
        match decode_envelope(frame) {
            Ok(envelope) => {
                trace!(
                    command = envelope.event.command(),
                    request_id = envelope.request_id,
                    "push frame decoded"
                );
                self.apply(envelope.event);
                true
            }
            Err(err) => {
                warn!(error = %err, "dropping undecodable push frame");
                false
            }
        }
    }

    /// Route one typed event to its store mutation.
    pub fn apply(&self, event: PushEvent) {
        match event {
            PushEvent::ClientState(state) => self.store.set_client_state(state),
            PushEvent::SyncStatus(status) => {
                debug!(
                    kind = ?status.kind,
                    error_count = status.error_count,
                    "sync status changed"
                );
                self.store.set_sync_status(status);
            }
            PushEvent::InitComplete => {
                info!(rooms = self.store.room_count(), "initial sync delivered");
                self.store.mark_init_complete();
            }
            PushEvent::SyncComplete(payload) => {
                let changed = self.store.apply_sync(payload);
                trace!(changed = changed.len(), "sync payload applied");
            }
            PushEvent::EventsDecrypted(batch) => {
                let Some(room) = self.store.get_room(&batch.room_id) else {
                    debug!(room_id = %batch.room_id, "decryption results for unknown room dropped");
                    return;
                };
                let updated =
                    room.mutate_if_changed(|state| state.apply_decrypted(batch.events) > 0);
                trace!(room_id = %batch.room_id, updated, "decryption results applied");
            }
            PushEvent::SendComplete(result) => {
                let Some(room) = self.store.get_room(&result.room_id) else {
                    warn!(
                        room_id = %result.room_id,
                        transaction_id = %result.transaction_id,
                        "send result for unknown room dropped"
                    );
                    return;
                };
                room.mutate_if_changed(|state| state.apply_send_complete(result));
            }
            PushEvent::ImageAuthToken(token) => self.store.set_image_auth_token(token),
            PushEvent::Typing(typing) => match self.store.get_room(&typing.room_id) {
                Some(room) => {
                    room.mutate_if_changed(|state| state.apply_typing(typing.user_ids));
                }
                None => {
                    trace!(room_id = %typing.room_id, "typing notice for unknown room dropped")
                }
            },
        }
    }

    /// Drain frames until the channel closes or `stop` is cancelled.
    pub async fn run(self, mut frames: mpsc::Receiver<String>, stop: CancellationToken) {
        debug!("sync applier started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        self.handle_frame(&frame);
                    }
                    None => break,
                },
            }
        }
        debug!("sync applier stopped");
    }

    /// Spawn the drain loop on the current runtime.
    pub fn spawn(self, buffer: usize) -> (mpsc::Sender<String>, ApplierTask) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let stop = CancellationToken::new();
        let task = tokio::spawn(self.run(rx, stop.clone()));
        (tx, ApplierTask { stop, task })
    }
}
