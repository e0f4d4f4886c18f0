use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type used for membership state events.
pub const MEMBER_EVENT_TYPE: &str = "m.room.member";
/// Event type used for reaction annotations.
pub const REACTION_EVENT_TYPE: &str = "m.reaction";
/// Event type of encrypted timeline rows before decryption.
pub const ENCRYPTED_EVENT_TYPE: &str = "m.room.encrypted";

/// Message type used when sending room messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MessageType {
    /// Standard text message (`m.text`).
    #[default]
    #[serde(rename = "m.text")]
    Text,
    /// Notice message (`m.notice`), usually non-intrusive/system-like.
    #[serde(rename = "m.notice")]
    Notice,
    /// Emote message (`m.emote`).
    #[serde(rename = "m.emote")]
    Emote,
}

/// Session summary pushed by the backend with `client_state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClientState {
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub is_verified: bool,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub homeserver_url: Option<String>,
}

/// Liveness of the backend sync loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatusKind {
    /// Sync is running and up to date.
    Ok,
    /// Backend is waiting before the next retry.
    Waiting,
    /// Last sync attempt failed; backend keeps retrying.
    Errored,
    /// Backend gave up; a restart or re-login is required.
    PermanentlyFailed,
}

/// Sync loop status pushed with `sync_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    #[serde(rename = "type")]
    pub kind: SyncStatusKind,
    #[serde(default)]
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl SyncStatus {
    /// Whether renderers should show the connection as healthy.
    pub fn is_connected(&self) -> bool {
        self.kind == SyncStatusKind::Ok
    }
}

/// Unread counters reported for a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UnreadCounts {
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub notifications: u64,
    #[serde(default)]
    pub highlights: u64,
}

/// Room-level attributes, replaced wholesale on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoomMeta {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub avatar: Option<String>,
    #[serde(default)]
    pub encrypted: bool,
    /// Backend already holds the complete member list for this room.
    #[serde(default)]
    pub has_member_list: bool,
    #[serde(default)]
    pub sorting_timestamp_ms: u64,
    #[serde(default)]
    pub unread: UnreadCounts,
}

/// Member profile entry of a room directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default = "default_membership")]
    pub membership: String,
}

fn default_membership() -> String {
    "join".to_owned()
}

/// Database row delivered by the backend for one timeline event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    /// Local, strictly increasing ordering key assigned by the backend store.
    pub row_id: i64,
    pub event_id: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub state_key: Option<String>,
    #[serde(default)]
    pub timestamp_ms: u64,
    #[serde(default)]
    pub content: Value,
    /// Plaintext content once the backend managed to decrypt the row.
    pub decrypted: Option<Value>,
    pub decrypted_type: Option<String>,
    pub decryption_error: Option<String>,
    /// Set when this row is the remote echo of a local send.
    pub transaction_id: Option<String>,
}

impl TimelineEvent {
    /// Effective event type, preferring the decrypted type when known.
    pub fn effective_type(&self) -> &str {
        self.decrypted_type.as_deref().unwrap_or(&self.event_type)
    }

    /// Effective content, preferring decrypted content when known.
    pub fn effective_content(&self) -> &Value {
        self.decrypted.as_ref().unwrap_or(&self.content)
    }

    /// Whether this row still waits for a decryption result.
    pub fn is_undecrypted(&self) -> bool {
        self.event_type == ENCRYPTED_EVENT_TYPE && self.decrypted.is_none()
    }

    /// Message body for display, when the content carries one.
    pub fn body(&self) -> Option<&str> {
        self.effective_content().get("body").and_then(Value::as_str)
    }
}

/// Per-room part of a `sync_complete` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncRoom {
    pub meta: Option<RoomMeta>,
    /// New timeline rows, oldest first.
    #[serde(default)]
    pub events: Vec<TimelineEvent>,
    /// Backend dropped its local timeline for this room (gap after a limited sync).
    #[serde(default)]
    pub reset: bool,
}

/// Incremental sync payload pushed with `sync_complete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncComplete {
    #[serde(default)]
    pub rooms: HashMap<String, SyncRoom>,
    #[serde(default)]
    pub left_rooms: Vec<String>,
}

/// Decryption result for one previously undecryptable row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecryptedEvent {
    pub row_id: i64,
    pub decrypted: Value,
    pub decrypted_type: String,
}

/// Batch of decryption results pushed with `events_decrypted`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventsDecrypted {
    pub room_id: String,
    pub events: Vec<DecryptedEvent>,
}

/// Resolution of a previously pending send, pushed with `send_complete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendComplete {
    pub room_id: String,
    pub transaction_id: String,
    pub event_id: Option<String>,
    pub row_id: Option<i64>,
    pub timestamp_ms: Option<u64>,
    pub error: Option<String>,
}

/// Typing notice pushed with `typing`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Typing {
    pub room_id: String,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

/// Locally echoable event returned by the `send_message` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalEcho {
    pub room_id: String,
    pub transaction_id: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub timestamp_ms: u64,
}

/// Response to `get_room_state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomStateSnapshot {
    pub meta: RoomMeta,
    /// Present only when the request asked for members.
    pub members: Option<Vec<Member>>,
}

/// Response to `paginate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PaginationPage {
    /// Older rows, in any order.
    #[serde(default)]
    pub events: Vec<TimelineEvent>,
    #[serde(default)]
    pub has_more: bool,
}
