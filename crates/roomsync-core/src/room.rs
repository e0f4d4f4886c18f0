//! Per-room state and its mutation methods.
//!
//! Every push event and every request completion for a room ends up in one of
//! the `apply_*` methods below. They are idempotent under redelivery: timeline
//! rows are de-duplicated by [`TimelineKey`], and derived aggregates are only
//! updated for rows that were actually inserted.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::{
    timeline::{ConfirmOutcome, InsertReport, SendState, Timeline, TimelineEntry, TimelineKey},
    types::{
        DecryptedEvent, LocalEcho, MEMBER_EVENT_TYPE, Member, PaginationPage, REACTION_EVENT_TYPE,
        RoomMeta, RoomStateSnapshot, SendComplete, SyncRoom, TimelineEvent, UnreadCounts,
    },
};

/// Parameters for the next older-history request of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    /// Exclusive upper bound; `None` asks for the newest rows.
    pub max_row_id: Option<i64>,
    pub limit: u16,
    /// Ask the backend to restart pagination from the live end.
    pub reset: bool,
}

/// Result of applying one pagination page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationOutcome {
    pub new_rows: usize,
    pub has_more: bool,
}

/// Reaction key -> number of annotations.
pub type ReactionCounts = BTreeMap<String, u32>;

/// In-memory state of one room.
#[derive(Debug, Clone)]
pub struct RoomState {
    room_id: String,
    meta: Option<RoomMeta>,
    state_loaded: bool,
    timeline: Timeline,
    members: HashMap<String, Member>,
    has_full_member_list: bool,
    history_exhausted: bool,
    page_size: u16,
    reactions: HashMap<String, ReactionCounts>,
    typing: BTreeSet<String>,
    unread: UnreadCounts,
}

impl RoomState {
    pub fn new(room_id: impl Into<String>, page_size: u16) -> Self {
        Self {
            room_id: room_id.into(),
            meta: None,
            state_loaded: false,
            timeline: Timeline::new(),
            members: HashMap::new(),
            has_full_member_list: false,
            history_exhausted: false,
            page_size: Timeline::bounded_paginate_limit(page_size, page_size),
            reactions: HashMap::new(),
            typing: BTreeSet::new(),
            unread: UnreadCounts::default(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn meta(&self) -> Option<&RoomMeta> {
        self.meta.as_ref()
    }

    /// Whether a full state snapshot has been applied at least once.
    pub fn state_loaded(&self) -> bool {
        self.state_loaded
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn members(&self) -> &HashMap<String, Member> {
        &self.members
    }

    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.get(user_id)
    }

    pub fn has_full_member_list(&self) -> bool {
        self.has_full_member_list
    }

    pub fn typing_users(&self) -> &BTreeSet<String> {
        &self.typing
    }

    pub fn reactions(&self, event_id: &str) -> Option<&ReactionCounts> {
        self.reactions.get(event_id)
    }

    pub fn unread(&self) -> UnreadCounts {
        self.unread
    }

    pub fn has_more_history(&self) -> bool {
        !self.history_exhausted
    }

    /// Oldest known row ID, or `None` once the full history is loaded.
    pub fn pagination_cursor(&self) -> Option<i64> {
        if self.history_exhausted {
            None
        } else {
            self.timeline.oldest_row_id()
        }
    }

    /// Local echoes that are still sending or have failed.
    pub fn pending_sends(&self) -> impl Iterator<Item = &TimelineEntry> {
        self.timeline.pending()
    }

    pub fn pagination_params(&self) -> PaginationParams {
        let max_row_id = self.timeline.oldest_row_id();
        PaginationParams {
            max_row_id,
            limit: self.page_size,
            reset: max_row_id.is_none(),
        }
    }

    /// Replace metadata and, when present in the snapshot, the member directory.
    pub fn apply_full_state(&mut self, snapshot: RoomStateSnapshot, members_only: bool) {
        if !members_only {
            self.unread = snapshot.meta.unread;
            self.meta = Some(snapshot.meta);
            self.state_loaded = true;
        }
        if let Some(members) = snapshot.members {
            self.members = members
                .into_iter()
                .map(|member| (member.user_id.clone(), member))
                .collect();
            self.has_full_member_list = true;
        }
        debug!(
            room_id = %self.room_id,
            members_only,
            member_count = self.members.len(),
            "applied full room state"
        );
    }

    /// Merge one room's part of a sync payload. Returns `true` when anything changed.
    ///
    /// `own_user_id` keeps the client's own messages out of the fallback unread count.
    pub fn apply_sync_delta(&mut self, delta: SyncRoom, own_user_id: Option<&str>) -> bool {
        let mut changed = false;
        if delta.reset {
            debug!(room_id = %self.room_id, "sync reset; dropping confirmed timeline rows");
            self.timeline.clear_confirmed();
            self.reactions.clear();
            self.history_exhausted = false;
            changed = true;
        }

        let meta_unread = delta.meta.as_ref().map(|meta| meta.unread);
        if let Some(meta) = delta.meta
            && self.meta.as_ref() != Some(&meta)
        {
            self.meta = Some(meta);
            changed = true;
        }

        let report = self.timeline.append_newer(delta.events);
        let message_rows = absorb_rows(
            &self.timeline,
            &report,
            &mut self.members,
            &mut self.reactions,
            RowSource::Live { own_user_id },
        );

        match meta_unread {
            Some(unread) => {
                changed |= self.unread != unread;
                self.unread = unread;
            }
            None => self.unread.messages += message_rows as u64,
        }

        for transaction_id in &report.promoted {
            debug!(room_id = %self.room_id, %transaction_id, "remote echo replaced local echo");
        }
        trace!(
            room_id = %self.room_id,
            inserted = report.inserted.len(),
            discarded = report.discarded,
            "applied sync delta"
        );
        changed || !report.inserted.is_empty()
    }

    /// Insert a page of older history.
    pub fn apply_pagination(&mut self, page: PaginationPage) -> PaginationOutcome {
        let page_was_empty = page.events.is_empty();
        let report = self.timeline.prepend_older(page.events);
        absorb_rows(
            &self.timeline,
            &report,
            &mut self.members,
            &mut self.reactions,
            RowSource::History,
        );

        if page_was_empty || !page.has_more {
            self.history_exhausted = true;
        } else {
            self.history_exhausted = false;
        }

        debug!(
            room_id = %self.room_id,
            new_rows = report.inserted.len(),
            discarded = report.discarded,
            has_more = !self.history_exhausted,
            "applied pagination page"
        );
        PaginationOutcome {
            new_rows: report.inserted.len(),
            has_more: !self.history_exhausted,
        }
    }

    /// Show a locally originated event at the tail until the backend confirms it.
    pub fn apply_pending(&mut self, echo: LocalEcho) -> TimelineKey {
        let transaction_id = echo.transaction_id.clone();
        let key = self.timeline.push_pending(echo);
        debug!(room_id = %self.room_id, %transaction_id, ?key, "added local echo");
        key
    }

    /// Resolve a pending send. Returns `true` when the timeline changed.
    pub fn apply_send_complete(&mut self, result: SendComplete) -> bool {
        let SendComplete {
            transaction_id,
            event_id,
            row_id,
            timestamp_ms,
            error,
            ..
        } = result;

        let error = match (error, event_id, row_id) {
            (None, Some(event_id), Some(row_id)) => {
                return match self.timeline.confirm_pending(
                    &transaction_id,
                    &event_id,
                    row_id,
                    timestamp_ms,
                ) {
                    ConfirmOutcome::Promoted(_) => {
                        debug!(room_id = %self.room_id, %transaction_id, %event_id, "send confirmed");
                        true
                    }
                    ConfirmOutcome::AlreadyConfirmed(_) => false,
                    ConfirmOutcome::Unknown => {
                        warn!(room_id = %self.room_id, %transaction_id, "send_complete for unknown transaction");
                        false
                    }
                };
            }
            (Some(error), _, _) => error,
            (None, _, _) => "send completed without event id".to_owned(),
        };

        if self.timeline.fail_pending(&transaction_id, &error) {
            warn!(room_id = %self.room_id, %transaction_id, %error, "send failed");
            true
        } else {
            warn!(room_id = %self.room_id, %transaction_id, "send failure for unknown transaction");
            false
        }
    }

    /// Replace decrypted content of rows already in the timeline.
    ///
    /// Results for rows not yet present are dropped; the sync delta that later
    /// introduces the row carries the decrypted content itself.
    pub fn apply_decrypted(&mut self, batch: Vec<DecryptedEvent>) -> usize {
        let mut updated = 0;
        for decrypted in batch {
            let key = TimelineKey::Confirmed(decrypted.row_id);
            let Some(was_undecrypted) = self
                .timeline
                .get(key)
                .map(|entry| entry.event.is_undecrypted())
            else {
                trace!(room_id = %self.room_id, row_id = decrypted.row_id, "dropping decryption result for unknown row");
                continue;
            };

            self.timeline
                .set_decrypted(decrypted.row_id, decrypted.decrypted, decrypted.decrypted_type);
            updated += 1;

            if was_undecrypted && let Some(entry) = self.timeline.get(key) {
                count_reaction(&mut self.reactions, &entry.event);
            }
        }
        updated
    }

    /// Replace the typing set wholesale.
    pub fn apply_typing(&mut self, user_ids: Vec<String>) -> bool {
        let typing: BTreeSet<String> = user_ids.into_iter().collect();
        if typing == self.typing {
            return false;
        }
        self.typing = typing;
        true
    }

    /// Remove a failed local echo the user chose to discard.
    pub fn dismiss_failed_send(&mut self, transaction_id: &str) -> bool {
        self.timeline.remove_failed(transaction_id)
    }

    /// Send state of a local echo by transaction ID.
    pub fn send_state(&self, transaction_id: &str) -> Option<&SendState> {
        self.timeline
            .get_by_txn_id(transaction_id)
            .map(|entry| &entry.send_state)
    }
}

#[derive(Clone, Copy)]
enum RowSource<'a> {
    Live { own_user_id: Option<&'a str> },
    History,
}

/// Fold newly inserted rows into member and reaction aggregates.
///
/// Returns the number of inserted live message rows sent by someone else.
/// History rows never override member profiles that newer rows already set.
fn absorb_rows(
    timeline: &Timeline,
    report: &InsertReport,
    members: &mut HashMap<String, Member>,
    reactions: &mut HashMap<String, ReactionCounts>,
    source: RowSource<'_>,
) -> usize {
    let mut message_rows = 0;
    for key in &report.inserted {
        let Some(entry) = timeline.get(*key) else {
            continue;
        };
        let event = &entry.event;
        if let Some(member) = member_from_event(event) {
            if matches!(source, RowSource::Live { .. }) {
                members.insert(member.user_id.clone(), member);
            } else {
                members.entry(member.user_id.clone()).or_insert(member);
            }
        }
        count_reaction(reactions, event);
        if let RowSource::Live { own_user_id } = source
            && is_message_like(event)
            && !is_own_row(event, own_user_id)
        {
            message_rows += 1;
        }
    }
    message_rows
}

fn member_from_event(event: &TimelineEvent) -> Option<Member> {
    if event.event_type != MEMBER_EVENT_TYPE {
        return None;
    }
    let user_id = event.state_key.clone()?;
    let content = &event.content;
    Some(Member {
        user_id,
        display_name: string_field(content, "displayname"),
        avatar_url: string_field(content, "avatar_url"),
        membership: string_field(content, "membership").unwrap_or_else(|| "join".to_owned()),
    })
}

fn count_reaction(reactions: &mut HashMap<String, ReactionCounts>, event: &TimelineEvent) {
    if event.effective_type() != REACTION_EVENT_TYPE {
        return;
    }
    let Some(relates_to) = event.effective_content().get("m.relates_to") else {
        return;
    };
    let (Some(target), Some(key)) = (
        string_field(relates_to, "event_id"),
        string_field(relates_to, "key"),
    ) else {
        return;
    };
    *reactions.entry(target).or_default().entry(key).or_insert(0) += 1;
}

fn is_message_like(event: &TimelineEvent) -> bool {
    event.state_key.is_none()
        && matches!(
            event.event_type.as_str(),
            "m.room.message" | "m.room.encrypted" | "m.sticker"
        )
}

/// Remote echo of a local send, or any row the client user sent.
fn is_own_row(event: &TimelineEvent, own_user_id: Option<&str>) -> bool {
    event.transaction_id.is_some() || own_user_id.is_some_and(|own| event.sender == own)
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ENCRYPTED_EVENT_TYPE;
    use proptest::prelude::*;
    use serde_json::json;

    const ROOM: &str = "!abc:example.org";

    fn event(row_id: i64) -> TimelineEvent {
        TimelineEvent {
            row_id,
            event_id: format!("$e{row_id}"),
            sender: "@bob:example.org".to_owned(),
            event_type: "m.room.message".to_owned(),
            state_key: None,
            timestamp_ms: 1_700_000_000_000 + row_id as u64,
            content: json!({"msgtype": "m.text", "body": format!("msg {row_id}")}),
            decrypted: None,
            decrypted_type: None,
            decryption_error: None,
            transaction_id: None,
        }
    }

    fn member_event(row_id: i64, user_id: &str, name: &str) -> TimelineEvent {
        TimelineEvent {
            event_type: MEMBER_EVENT_TYPE.to_owned(),
            state_key: Some(user_id.to_owned()),
            content: json!({"membership": "join", "displayname": name}),
            ..event(row_id)
        }
    }

    fn reaction_event(row_id: i64, target: &str, key: &str) -> TimelineEvent {
        TimelineEvent {
            event_type: REACTION_EVENT_TYPE.to_owned(),
            content: json!({"m.relates_to": {"rel_type": "m.annotation", "event_id": target, "key": key}}),
            ..event(row_id)
        }
    }

    fn delta(rows: &[i64]) -> SyncRoom {
        SyncRoom {
            meta: None,
            events: rows.iter().copied().map(event).collect(),
            reset: false,
        }
    }

    fn page(rows: &[i64], has_more: bool) -> PaginationPage {
        PaginationPage {
            events: rows.iter().copied().map(event).collect(),
            has_more,
        }
    }

    fn echo(txn: &str, body: &str) -> LocalEcho {
        LocalEcho {
            room_id: ROOM.to_owned(),
            transaction_id: txn.to_owned(),
            sender: "@alice:example.org".to_owned(),
            event_type: "m.room.message".to_owned(),
            content: json!({"msgtype": "m.text", "body": body}),
            timestamp_ms: 1_700_000_000_000,
        }
    }

    fn row_ids(room: &RoomState) -> Vec<i64> {
        room.timeline()
            .entries()
            .filter_map(|entry| entry.key.row_id())
            .collect()
    }

    #[test]
    fn pagination_overlap_keeps_only_new_rows() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_sync_delta(delta(&[1, 2, 3]), None);

        let outcome = room.apply_pagination(page(&[0, 1, 2], true));

        assert_eq!(outcome.new_rows, 1);
        assert_eq!(row_ids(&room), vec![0, 1, 2, 3]);
        assert_eq!(room.pagination_cursor(), Some(0));
        assert!(room.has_more_history());
    }

    #[test]
    fn replaying_sync_delta_is_idempotent() {
        let mut room = RoomState::new(ROOM, 50);
        let payload = SyncRoom {
            meta: Some(RoomMeta {
                name: Some("Lobby".into()),
                ..RoomMeta::default()
            }),
            events: vec![
                event(1),
                member_event(2, "@bob:example.org", "Bob"),
                reaction_event(3, "$e1", "👍"),
            ],
            reset: false,
        };

        assert!(room.apply_sync_delta(payload.clone(), None));
        let first_rows = row_ids(&room);
        let first_reactions = room.reactions("$e1").cloned();

        assert!(!room.apply_sync_delta(payload, None));
        assert_eq!(row_ids(&room), first_rows);
        assert_eq!(room.reactions("$e1").cloned(), first_reactions);
        assert_eq!(room.reactions("$e1").and_then(|r| r.get("👍")), Some(&1));
        assert_eq!(
            room.member("@bob:example.org")
                .and_then(|m| m.display_name.as_deref()),
            Some("Bob")
        );
    }

    #[test]
    fn incremental_sync_does_not_move_cursor_backward() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_sync_delta(delta(&[10, 11]), None);
        assert_eq!(room.pagination_cursor(), Some(10));

        room.apply_sync_delta(delta(&[5, 12]), None);
        assert_eq!(room.pagination_cursor(), Some(10));
        assert_eq!(row_ids(&room), vec![10, 11, 12]);
    }

    #[test]
    fn pending_then_success_leaves_one_row_indexed_by_event_id() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_pending(echo("t1", "hi"));
        assert!(room.timeline().get_by_event_id("$e1").is_none());

        let changed = room.apply_send_complete(SendComplete {
            room_id: ROOM.to_owned(),
            transaction_id: "t1".to_owned(),
            event_id: Some("$e1".to_owned()),
            row_id: Some(10),
            timestamp_ms: None,
            error: None,
        });

        assert!(changed);
        assert_eq!(room.timeline().len(), 1);
        let entry = room
            .timeline()
            .get_by_event_id("$e1")
            .expect("confirmed row indexed by event id");
        assert_eq!(entry.key, TimelineKey::Confirmed(10));
        assert_eq!(entry.event.body(), Some("hi"));
        assert_eq!(room.pending_sends().count(), 0);
    }

    #[test]
    fn pending_then_failure_keeps_row_marked_failed() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_pending(echo("t1", "hi"));

        room.apply_send_complete(SendComplete {
            room_id: ROOM.to_owned(),
            transaction_id: "t1".to_owned(),
            event_id: None,
            row_id: None,
            timestamp_ms: None,
            error: Some("M_FORBIDDEN".to_owned()),
        });

        assert_eq!(room.timeline().len(), 1);
        assert_eq!(
            room.send_state("t1"),
            Some(&SendState::Failed("M_FORBIDDEN".to_owned()))
        );
        assert_eq!(room.pending_sends().count(), 1);

        assert!(room.dismiss_failed_send("t1"));
        assert!(room.timeline().is_empty());
    }

    #[test]
    fn success_without_event_id_is_treated_as_failure() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_pending(echo("t1", "hi"));
        room.apply_send_complete(SendComplete {
            room_id: ROOM.to_owned(),
            transaction_id: "t1".to_owned(),
            event_id: None,
            row_id: Some(3),
            timestamp_ms: None,
            error: None,
        });
        assert!(matches!(room.send_state("t1"), Some(SendState::Failed(_))));
    }

    #[test]
    fn decryption_updates_present_rows_and_drops_unknown_ones() {
        let mut room = RoomState::new(ROOM, 50);
        let encrypted = TimelineEvent {
            event_type: ENCRYPTED_EVENT_TYPE.to_owned(),
            content: json!({"algorithm": "m.megolm.v1.aes-sha2"}),
            ..event(7)
        };
        room.apply_sync_delta(
            SyncRoom {
                events: vec![event(6), encrypted],
                ..SyncRoom::default()
            },
            None,
        );

        let updated = room.apply_decrypted(vec![
            DecryptedEvent {
                row_id: 7,
                decrypted: json!({"msgtype": "m.text", "body": "secret"}),
                decrypted_type: "m.room.message".to_owned(),
            },
            DecryptedEvent {
                row_id: 99,
                decrypted: json!({"body": "early"}),
                decrypted_type: "m.room.message".to_owned(),
            },
        ]);

        assert_eq!(updated, 1);
        assert_eq!(row_ids(&room), vec![6, 7]);
        let entry = room
            .timeline()
            .get(TimelineKey::Confirmed(7))
            .expect("row 7 present");
        assert_eq!(entry.event.body(), Some("secret"));
        assert!(room.timeline().get(TimelineKey::Confirmed(99)).is_none());
    }

    #[test]
    fn decrypted_reaction_is_counted_once() {
        let mut room = RoomState::new(ROOM, 50);
        let encrypted = TimelineEvent {
            event_type: ENCRYPTED_EVENT_TYPE.to_owned(),
            ..event(2)
        };
        room.apply_sync_delta(
            SyncRoom {
                events: vec![event(1), encrypted],
                ..SyncRoom::default()
            },
            None,
        );
        let result = DecryptedEvent {
            row_id: 2,
            decrypted: json!({"m.relates_to": {"event_id": "$e1", "key": "🎉"}}),
            decrypted_type: REACTION_EVENT_TYPE.to_owned(),
        };

        room.apply_decrypted(vec![result.clone()]);
        room.apply_decrypted(vec![result]);

        assert_eq!(room.reactions("$e1").and_then(|r| r.get("🎉")), Some(&1));
    }

    #[test]
    fn stray_decryption_of_plain_reaction_does_not_recount() {
        let mut room = RoomState::new(ROOM, 50);
        let reaction = TimelineEvent {
            event_type: REACTION_EVENT_TYPE.to_owned(),
            content: json!({"m.relates_to": {"event_id": "$e1", "key": "👍"}}),
            ..event(2)
        };
        room.apply_sync_delta(
            SyncRoom {
                events: vec![event(1), reaction],
                ..SyncRoom::default()
            },
            None,
        );

        room.apply_decrypted(vec![DecryptedEvent {
            row_id: 2,
            decrypted: json!({"m.relates_to": {"event_id": "$e1", "key": "👍"}}),
            decrypted_type: REACTION_EVENT_TYPE.to_owned(),
        }]);

        assert_eq!(room.reactions("$e1").and_then(|r| r.get("👍")), Some(&1));
    }

    #[test]
    fn typing_is_replaced_wholesale() {
        let mut room = RoomState::new(ROOM, 50);
        assert!(room.apply_typing(vec!["@a:example.org".into(), "@b:example.org".into()]));
        assert!(room.apply_typing(vec!["@c:example.org".into()]));
        assert!(!room.apply_typing(vec!["@c:example.org".into()]));
        assert_eq!(
            room.typing_users().iter().cloned().collect::<Vec<_>>(),
            vec!["@c:example.org".to_owned()]
        );
    }

    #[test]
    fn members_only_state_keeps_meta() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_full_state(
            RoomStateSnapshot {
                meta: RoomMeta {
                    name: Some("Lobby".into()),
                    ..RoomMeta::default()
                },
                members: None,
            },
            false,
        );
        assert!(room.state_loaded());
        assert!(!room.has_full_member_list());

        room.apply_full_state(
            RoomStateSnapshot {
                meta: RoomMeta::default(),
                members: Some(vec![Member {
                    user_id: "@bob:example.org".into(),
                    display_name: Some("Bob".into()),
                    avatar_url: None,
                    membership: "join".into(),
                }]),
            },
            true,
        );

        assert_eq!(room.meta().and_then(|m| m.name.as_deref()), Some("Lobby"));
        assert!(room.has_full_member_list());
        assert_eq!(room.members().len(), 1);
    }

    #[test]
    fn history_member_rows_do_not_override_live_profiles() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_sync_delta(
            SyncRoom {
                events: vec![member_event(10, "@bob:example.org", "Bob (new)")],
                ..SyncRoom::default()
            },
            None,
        );
        room.apply_pagination(PaginationPage {
            events: vec![member_event(3, "@bob:example.org", "Bob (old)")],
            has_more: true,
        });
        assert_eq!(
            room.member("@bob:example.org")
                .and_then(|m| m.display_name.as_deref()),
            Some("Bob (new)")
        );
    }

    #[test]
    fn empty_or_final_page_exhausts_history() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_sync_delta(delta(&[5]), None);
        room.apply_pagination(page(&[3, 4], false));
        assert!(!room.has_more_history());
        assert_eq!(room.pagination_cursor(), None);

        let mut room = RoomState::new(ROOM, 50);
        room.apply_sync_delta(delta(&[5]), None);
        room.apply_pagination(page(&[], true));
        assert!(!room.has_more_history());
    }

    #[test]
    fn reset_drops_confirmed_rows_but_keeps_local_echo() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_sync_delta(delta(&[1, 2]), None);
        room.apply_pending(echo("t1", "hi"));
        room.apply_pagination(page(&[], false));

        room.apply_sync_delta(
            SyncRoom {
                events: vec![event(40)],
                reset: true,
                ..SyncRoom::default()
            },
            None,
        );

        assert_eq!(row_ids(&room), vec![40]);
        assert_eq!(room.pending_sends().count(), 1);
        assert!(room.has_more_history());
    }

    #[test]
    fn pagination_params_start_from_live_end_when_empty() {
        let mut room = RoomState::new(ROOM, 500);
        let params = room.pagination_params();
        assert_eq!(params.max_row_id, None);
        assert!(params.reset);
        assert_eq!(params.limit, 100);

        room.apply_sync_delta(delta(&[8, 9]), None);
        let params = room.pagination_params();
        assert_eq!(params.max_row_id, Some(8));
        assert!(!params.reset);
    }

    #[test]
    fn unread_counter_follows_meta_or_counts_messages() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_sync_delta(delta(&[1, 2]), None);
        assert_eq!(room.unread().messages, 2);

        room.apply_sync_delta(
            SyncRoom {
                meta: Some(RoomMeta {
                    unread: UnreadCounts {
                        messages: 0,
                        notifications: 0,
                        highlights: 0,
                    },
                    ..RoomMeta::default()
                }),
                events: vec![event(3)],
                reset: false,
            },
            None,
        );
        assert_eq!(room.unread().messages, 0);
    }

    fn confirm(room: &mut RoomState, txn: &str, row_id: i64) -> bool {
        room.apply_send_complete(SendComplete {
            room_id: ROOM.to_owned(),
            transaction_id: txn.to_owned(),
            event_id: Some(format!("$e{row_id}")),
            row_id: Some(row_id),
            timestamp_ms: None,
            error: None,
        })
    }

    #[test]
    fn confirmed_echo_does_not_hide_older_live_rows() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_sync_delta(delta(&[1, 2]), None);
        room.apply_pending(echo("t1", "hi"));
        assert!(confirm(&mut room, "t1", 10));

        assert!(room.apply_sync_delta(delta(&[8, 9]), None));
        assert_eq!(row_ids(&room), vec![1, 2, 8, 9, 10]);

        // The remote echo itself arrives later and is de-duplicated by row.
        let mut remote = event(10);
        remote.transaction_id = Some("t1".to_owned());
        room.apply_sync_delta(
            SyncRoom {
                events: vec![remote, event(11)],
                ..SyncRoom::default()
            },
            None,
        );
        assert_eq!(row_ids(&room), vec![1, 2, 8, 9, 10, 11]);
        assert_eq!(room.timeline().delivered_tail(), Some(11));
    }

    #[test]
    fn send_confirmed_before_first_sync_keeps_initial_batch() {
        let mut room = RoomState::new(ROOM, 50);
        room.apply_pending(echo("t1", "hi"));
        assert!(confirm(&mut room, "t1", 10));

        room.apply_sync_delta(delta(&[5, 6, 7]), None);

        assert_eq!(row_ids(&room), vec![5, 6, 7, 10]);
        assert_eq!(room.pagination_cursor(), Some(5));
    }

    #[test]
    fn fallback_unread_skips_own_messages() {
        let mut room = RoomState::new(ROOM, 50);
        let mine = TimelineEvent {
            sender: "@alice:example.org".to_owned(),
            ..event(2)
        };
        let remote_echo = TimelineEvent {
            transaction_id: Some("t9".to_owned()),
            ..event(3)
        };
        room.apply_sync_delta(
            SyncRoom {
                events: vec![event(1), mine, remote_echo, event(4)],
                ..SyncRoom::default()
            },
            Some("@alice:example.org"),
        );

        assert_eq!(room.unread().messages, 2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Sync(Vec<i64>),
        Page(Vec<i64>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let rows = prop::collection::vec(0..200i64, 0..12);
        prop_oneof![
            rows.clone().prop_map(Op::Sync),
            rows.prop_map(Op::Page),
        ]
    }

    proptest! {
        #[test]
        fn interleaved_sync_and_pagination_stay_sorted_and_unique(
            ops in prop::collection::vec(op_strategy(), 0..40)
        ) {
            let mut room = RoomState::new(ROOM, 50);
            for op in ops {
                match op {
                    Op::Sync(rows) => {
                        let mut rows = rows;
                        rows.sort_unstable();
                        room.apply_sync_delta(delta(&rows), None);
                    }
                    Op::Page(rows) => {
                        room.apply_pagination(page(&rows, true));
                    }
                }
                let rows = row_ids(&room);
                prop_assert!(rows.windows(2).all(|pair| pair[0] < pair[1]));
                for entry in room.timeline().entries() {
                    let by_id = room.timeline().get_by_event_id(&entry.event.event_id);
                    prop_assert_eq!(by_id.map(|found| found.key), Some(entry.key));
                }
            }
        }
    }
}
