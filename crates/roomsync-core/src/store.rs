//! Global registry of rooms plus client-wide state.

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    channel::{ChangeFeed, ChangeStream, StoreChange},
    room::RoomState,
    types::{ClientState, SyncComplete, SyncStatus},
};

/// Default number of rows requested per pagination call.
pub const DEFAULT_PAGE_SIZE: u16 = 50;
const DEFAULT_CHANGE_BUFFER: usize = 512;

/// Request kinds that allow at most one in-flight call per room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    StateLoad,
    Pagination,
}

impl RequestKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::StateLoad => "state load",
            Self::Pagination => "pagination",
        }
    }
}

/// Shared handle to one room: state lock, request guards and change signal.
#[derive(Debug)]
pub struct RoomHandle {
    room_id: String,
    state: RwLock<RoomState>,
    state_load_in_flight: AtomicBool,
    pagination_in_flight: AtomicBool,
    revision: watch::Sender<u64>,
    feed: ChangeFeed,
}

impl RoomHandle {
    fn new(room_id: String, page_size: u16, feed: ChangeFeed) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(RoomState::new(room_id.clone(), page_size)),
            room_id,
            state_load_in_flight: AtomicBool::new(false),
            pagination_in_flight: AtomicBool::new(false),
            revision,
            feed,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Read-only view for renderers.
    pub fn read(&self) -> RwLockReadGuard<'_, RoomState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one mutation and notify subscribers.
    ///
    /// Reserved for the sync applier and the request façade.
    pub fn mutate<R>(&self, apply: impl FnOnce(&mut RoomState) -> R) -> R {
        let result = {
            let mut state = self.write();
            apply(&mut state)
        };
        self.notify();
        result
    }

    /// Run one mutation that reports whether it changed anything.
    ///
    /// Subscribers are only notified when it did.
    pub fn mutate_if_changed(&self, apply: impl FnOnce(&mut RoomState) -> bool) -> bool {
        let changed = {
            let mut state = self.write();
            apply(&mut state)
        };
        if changed {
            self.notify();
        }
        changed
    }

    /// Per-room change signal carrying a revision counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Whether a request of this kind is currently in flight.
    pub fn is_in_flight(&self, kind: RequestKind) -> bool {
        self.flag(kind).load(Ordering::Acquire)
    }

    /// Move the guard for `kind` from idle to in-flight.
    ///
    /// Returns `None` when another request of the same kind already holds it.
    /// The returned guard releases the flag when dropped.
    pub fn try_begin(self: &Arc<Self>, kind: RequestKind) -> Option<RequestGuard> {
        self.flag(kind)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RequestGuard {
                room: Arc::clone(self),
                kind,
            })
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
        self.feed.emit(StoreChange::RoomUpdated(self.room_id.clone()));
    }

    fn write(&self) -> RwLockWriteGuard<'_, RoomState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn flag(&self, kind: RequestKind) -> &AtomicBool {
        match kind {
            RequestKind::StateLoad => &self.state_load_in_flight,
            RequestKind::Pagination => &self.pagination_in_flight,
        }
    }
}

/// In-flight marker for one request kind; released on drop.
#[derive(Debug)]
pub struct RequestGuard {
    room: Arc<RoomHandle>,
    kind: RequestKind,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.room.flag(self.kind).store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct ClientSummary {
    client_state: Option<ClientState>,
    sync_status: Option<SyncStatus>,
    init_complete: bool,
}

/// Registry of all rooms plus client-wide state.
#[derive(Debug)]
pub struct GlobalStore {
    rooms: RwLock<HashMap<String, Arc<RoomHandle>>>,
    client: RwLock<ClientSummary>,
    image_auth_token: RwLock<Option<String>>,
    page_size: u16,
    feed: ChangeFeed,
}

impl Default for GlobalStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_CHANGE_BUFFER)
    }
}

impl GlobalStore {
    pub fn new(page_size: u16, change_buffer: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            client: RwLock::new(ClientSummary::default()),
            image_auth_token: RwLock::new(None),
            page_size,
            feed: ChangeFeed::new(change_buffer),
        }
    }

    /// Look up a room without creating it.
    pub fn get_room(&self, room_id: &str) -> Option<Arc<RoomHandle>> {
        read_lock(&self.rooms).get(room_id).cloned()
    }

    /// Look up a room, creating an empty one on first reference.
    pub fn ensure_room(&self, room_id: &str) -> Arc<RoomHandle> {
        if let Some(room) = self.get_room(room_id) {
            return room;
        }

        let (room, created) = {
            let mut rooms = write_lock(&self.rooms);
            match rooms.get(room_id) {
                Some(room) => (Arc::clone(room), false),
                None => {
                    let room = Arc::new(RoomHandle::new(
                        room_id.to_owned(),
                        self.page_size,
                        self.feed.clone(),
                    ));
                    rooms.insert(room_id.to_owned(), Arc::clone(&room));
                    (room, true)
                }
            }
        };

        if created {
            debug!(%room_id, "room created");
            self.feed.emit(StoreChange::RoomAdded(room_id.to_owned()));
        }
        room
    }

    /// Drop a room after leave/forget. Returns `false` for unknown rooms.
    pub fn forget_room(&self, room_id: &str) -> bool {
        let removed = write_lock(&self.rooms).remove(room_id).is_some();
        if removed {
            debug!(%room_id, "room removed");
            self.feed.emit(StoreChange::RoomRemoved(room_id.to_owned()));
        }
        removed
    }

    /// Known room IDs, sorted for stable rendering.
    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read_lock(&self.rooms).keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn room_count(&self) -> usize {
        read_lock(&self.rooms).len()
    }

    /// Fan a sync payload out to its rooms. Returns IDs of rooms that changed.
    pub fn apply_sync(&self, payload: SyncComplete) -> Vec<String> {
        let SyncComplete { rooms, left_rooms } = payload;
        let own_user_id = read_lock(&self.client)
            .client_state
            .as_ref()
            .and_then(|state| state.user_id.clone());
        let mut changed = Vec::with_capacity(rooms.len());
        for (room_id, delta) in rooms {
            let room = self.ensure_room(&room_id);
            if room.mutate_if_changed(|state| {
                state.apply_sync_delta(delta, own_user_id.as_deref())
            }) {
                changed.push(room_id);
            }
        }
        for room_id in left_rooms {
            self.forget_room(&room_id);
        }
        changed
    }

    pub fn set_client_state(&self, state: ClientState) {
        info!(
            logged_in = state.is_logged_in,
            user_id = state.user_id.as_deref().unwrap_or("-"),
            "client state updated"
        );
        write_lock(&self.client).client_state = Some(state);
        self.feed.emit(StoreChange::ClientState);
    }

    pub fn client_state(&self) -> Option<ClientState> {
        read_lock(&self.client).client_state.clone()
    }

    pub fn set_sync_status(&self, status: SyncStatus) {
        write_lock(&self.client).sync_status = Some(status);
        self.feed.emit(StoreChange::SyncStatus);
    }

    pub fn sync_status(&self) -> Option<SyncStatus> {
        read_lock(&self.client).sync_status.clone()
    }

    pub fn mark_init_complete(&self) {
        write_lock(&self.client).init_complete = true;
        self.feed.emit(StoreChange::InitComplete);
    }

    pub fn is_init_complete(&self) -> bool {
        read_lock(&self.client).init_complete
    }

    /// Replace the media auth token wholesale.
    pub fn set_image_auth_token(&self, token: String) {
        *write_lock(&self.image_auth_token) = Some(token);
        self.feed.emit(StoreChange::ImageAuthToken);
    }

    /// Current media auth token; readers get whatever value is current.
    pub fn image_auth_token(&self) -> Option<String> {
        read_lock(&self.image_auth_token).clone()
    }

    /// Subscribe to global change notifications.
    pub fn subscribe(&self) -> ChangeStream {
        self.feed.subscribe()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SyncRoom, SyncStatusKind, TimelineEvent};
    use serde_json::json;

    fn event(row_id: i64) -> TimelineEvent {
        TimelineEvent {
            row_id,
            event_id: format!("$e{row_id}"),
            sender: "@bob:example.org".to_owned(),
            event_type: "m.room.message".to_owned(),
            state_key: None,
            timestamp_ms: 0,
            content: json!({"body": "x"}),
            decrypted: None,
            decrypted_type: None,
            decryption_error: None,
            transaction_id: None,
        }
    }

    fn sync_for(room_id: &str, rows: &[i64]) -> SyncComplete {
        SyncComplete {
            rooms: HashMap::from([(
                room_id.to_owned(),
                SyncRoom {
                    events: rows.iter().copied().map(event).collect(),
                    ..SyncRoom::default()
                },
            )]),
            left_rooms: Vec::new(),
        }
    }

    #[test]
    fn get_room_never_creates() {
        let store = GlobalStore::default();
        assert!(store.get_room("!a:example.org").is_none());
        assert_eq!(store.room_count(), 0);

        let created = store.ensure_room("!a:example.org");
        let again = store.ensure_room("!a:example.org");
        assert!(Arc::ptr_eq(&created, &again));
        assert_eq!(store.room_ids(), vec!["!a:example.org".to_owned()]);
    }

    #[test]
    fn apply_sync_creates_rooms_and_removes_left_ones() {
        let store = GlobalStore::default();
        store.ensure_room("!old:example.org");

        let mut payload = sync_for("!new:example.org", &[1, 2]);
        payload.left_rooms.push("!old:example.org".to_owned());
        let changed = store.apply_sync(payload);

        assert_eq!(changed, vec!["!new:example.org".to_owned()]);
        assert!(store.get_room("!old:example.org").is_none());
        let room = store.get_room("!new:example.org").expect("room created");
        assert_eq!(room.read().timeline().len(), 2);
    }

    #[test]
    fn replayed_sync_reports_no_change() {
        let store = GlobalStore::default();
        store.apply_sync(sync_for("!a:example.org", &[1]));
        let changed = store.apply_sync(sync_for("!a:example.org", &[1]));
        assert!(changed.is_empty());
    }

    #[test]
    fn replayed_sync_does_not_signal_subscribers() {
        let store = GlobalStore::default();
        store.apply_sync(sync_for("!a:example.org", &[1]));
        let room = store.get_room("!a:example.org").expect("room");
        let revision = room.revision();
        let mut changes = store.subscribe();

        store.apply_sync(sync_for("!a:example.org", &[1]));

        assert_eq!(room.revision(), revision);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn unchanged_typing_set_does_not_signal() {
        let store = GlobalStore::default();
        let room = store.ensure_room("!a:example.org");
        let typing = || vec!["@bob:example.org".to_owned()];

        assert!(room.mutate_if_changed(|state| state.apply_typing(typing())));
        assert!(!room.mutate_if_changed(|state| state.apply_typing(typing())));
        assert_eq!(room.revision(), 1);
    }

    #[test]
    fn sync_unread_fallback_ignores_client_user() {
        let store = GlobalStore::default();
        store.set_client_state(ClientState {
            is_logged_in: true,
            user_id: Some("@alice:example.org".to_owned()),
            ..ClientState::default()
        });
        let mut payload = sync_for("!a:example.org", &[1, 2]);
        if let Some(room) = payload.rooms.get_mut("!a:example.org") {
            room.events[1].sender = "@alice:example.org".to_owned();
        }

        store.apply_sync(payload);

        let room = store.get_room("!a:example.org").expect("room");
        assert_eq!(room.read().unread().messages, 1);
    }

    #[test]
    fn mutation_bumps_room_revision() {
        let store = GlobalStore::default();
        let room = store.ensure_room("!a:example.org");
        let mut signal = room.subscribe();
        assert_eq!(room.revision(), 0);

        room.mutate(|state| state.apply_typing(vec!["@bob:example.org".into()]));

        assert_eq!(room.revision(), 1);
        assert!(signal.has_changed().expect("sender alive"));
    }

    #[test]
    fn guard_allows_one_holder_and_releases_on_drop() {
        let store = GlobalStore::default();
        let room = store.ensure_room("!a:example.org");

        let guard = room
            .try_begin(RequestKind::Pagination)
            .expect("first caller gets the guard");
        assert!(room.try_begin(RequestKind::Pagination).is_none());
        assert!(room.try_begin(RequestKind::StateLoad).is_some());
        assert!(room.is_in_flight(RequestKind::Pagination));

        drop(guard);
        assert!(!room.is_in_flight(RequestKind::Pagination));
        assert!(room.try_begin(RequestKind::Pagination).is_some());
    }

    #[test]
    fn image_auth_token_is_replaced_wholesale() {
        let store = GlobalStore::default();
        assert_eq!(store.image_auth_token(), None);
        store.set_image_auth_token("tok1".into());
        store.set_image_auth_token("tok2".into());
        assert_eq!(store.image_auth_token().as_deref(), Some("tok2"));
    }

    #[tokio::test]
    async fn global_subscribers_see_room_and_client_changes() {
        let store = GlobalStore::default();
        let mut changes = store.subscribe();

        store.ensure_room("!a:example.org");
        store.set_sync_status(SyncStatus {
            kind: SyncStatusKind::Ok,
            error_count: 0,
            last_error: None,
        });

        assert_eq!(
            changes.recv().await.expect("room added"),
            StoreChange::RoomAdded("!a:example.org".into())
        );
        assert_eq!(
            changes.recv().await.expect("sync status"),
            StoreChange::SyncStatus
        );
        assert!(store.sync_status().is_some_and(|status| status.is_connected()));
    }
}
