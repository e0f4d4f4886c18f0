//! Client-side replica of chat state pushed by a backend process.
//!
//! This crate holds the per-room and global stores, the wire envelope decoder,
//! the ordered timeline, and the error/notification primitives shared with the
//! request and sync layers.

/// Broadcast notifications for global store changes.
pub mod channel;
/// Push frame decoding into typed events.
pub mod envelope;
/// Stable error types with machine-readable codes.
pub mod error;
/// Media locator parsing and URL construction.
pub mod media;
/// Per-room state and its mutation rules.
pub mod room;
/// Global room registry, request guards and change signals.
pub mod store;
/// Ordered timeline keyed by backend row ID.
pub mod timeline;
/// Wire payload types shared with the backend.
pub mod types;

pub use channel::{ChangeFeed, ChangeStream, StoreChange};
pub use envelope::{Envelope, PushEvent, decode_envelope, decode_payload};
pub use error::{DecodeError, ErrorCategory, StoreError, TransportError, TransportErrorKind};
pub use media::{MediaLocator, media_url};
pub use room::{PaginationOutcome, PaginationParams, ReactionCounts, RoomState};
pub use store::{DEFAULT_PAGE_SIZE, GlobalStore, RequestGuard, RequestKind, RoomHandle};
pub use timeline::{
    ConfirmOutcome, InsertReport, MAX_PAGINATE_LIMIT, SendState, Timeline, TimelineEntry,
    TimelineKey,
};
pub use types::{
    ClientState, DecryptedEvent, EventsDecrypted, LocalEcho, Member, MessageType,
    PaginationPage, RoomMeta, RoomStateSnapshot, SendComplete, SyncComplete, SyncRoom,
    SyncStatus, SyncStatusKind, TimelineEvent, Typing, UnreadCounts,
};
