use tokio::sync::broadcast;

/// Broadcast stream of global store changes used by renderers.
pub type ChangeStream = broadcast::Receiver<StoreChange>;

/// Coarse notification that some part of the store changed.
///
/// Receivers re-query the store; the notification carries no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A room was created in the registry.
    RoomAdded(String),
    /// Room state was mutated.
    RoomUpdated(String),
    /// A room was removed after leave/forget.
    RoomRemoved(String),
    /// Session summary replaced.
    ClientState,
    /// Sync liveness changed.
    SyncStatus,
    /// Initial backlog fully delivered.
    InitComplete,
    /// Media auth token rotated.
    ImageAuthToken,
}

/// Fan-out sender for [`StoreChange`] notifications.
#[derive(Clone, Debug)]
pub struct ChangeFeed {
    tx: broadcast::Sender<StoreChange>,
}

impl ChangeFeed {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    /// Subscribe to future changes.
    pub fn subscribe(&self) -> ChangeStream {
        self.tx.subscribe()
    }

    /// Emit a change to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, change: StoreChange) {
        let _ = self.tx.send(change);
    }
}
