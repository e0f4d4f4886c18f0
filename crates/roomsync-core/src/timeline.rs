use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::debug;

use crate::types::{LocalEcho, TimelineEvent};

/// Hard cap applied to any pagination request.
pub const MAX_PAGINATE_LIMIT: u16 = 100;

/// Ordering key of a timeline entry.
///
/// Every `Pending` key sorts after every `Confirmed` key, so local echoes stay
/// at the tail without reserving any part of the server row-id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimelineKey {
    /// Row confirmed by the backend store.
    Confirmed(i64),
    /// Local echo, numbered in send order.
    Pending(u64),
}

impl TimelineKey {
    pub fn row_id(self) -> Option<i64> {
        match self {
            Self::Confirmed(row_id) => Some(row_id),
            Self::Pending(_) => None,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Delivery state of a timeline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendState {
    /// Known to the backend store.
    Confirmed,
    /// Local echo waiting for `send_complete`.
    Sending,
    /// Send failed; kept until the user dismisses it.
    Failed(String),
}

/// One row of a room timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub key: TimelineKey,
    pub event: TimelineEvent,
    pub send_state: SendState,
}

impl TimelineEntry {
    /// Server event ID, absent for local echoes.
    pub fn event_id(&self) -> Option<&str> {
        match self.key {
            TimelineKey::Confirmed(_) => Some(self.event.event_id.as_str()),
            TimelineKey::Pending(_) => None,
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.event.transaction_id.as_deref()
    }
}

/// Rows accepted and rejected by one timeline insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: Vec<TimelineKey>,
    pub discarded: usize,
    /// Transaction IDs whose local echo was replaced by a remote echo.
    pub promoted: Vec<String>,
}

/// Result of resolving a local echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Local echo moved to its confirmed row.
    Promoted(TimelineKey),
    /// Remote echo already arrived; local echo was dropped.
    AlreadyConfirmed(TimelineKey),
    /// No pending entry for this transaction.
    Unknown,
}

/// Room timeline ordered by [`TimelineKey`] with event/transaction indexes.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: BTreeMap<TimelineKey, TimelineEntry>,
    by_event_id: HashMap<String, TimelineKey>,
    by_txn_id: HashMap<String, TimelineKey>,
    /// Newest row delivered by the backend timeline; promoted echoes never move it.
    delivered_tail: Option<i64>,
    next_pending_seq: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in display order, oldest first.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &TimelineEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: TimelineKey) -> Option<&TimelineEntry> {
        self.entries.get(&key)
    }

    pub fn get_by_event_id(&self, event_id: &str) -> Option<&TimelineEntry> {
        self.by_event_id
            .get(event_id)
            .and_then(|key| self.entries.get(key))
    }

    pub fn get_by_txn_id(&self, transaction_id: &str) -> Option<&TimelineEntry> {
        self.by_txn_id
            .get(transaction_id)
            .and_then(|key| self.entries.get(key))
    }

    /// Local echoes that are still sending or have failed.
    pub fn pending(&self) -> impl Iterator<Item = &TimelineEntry> {
        self.entries
            .range(TimelineKey::Pending(0)..)
            .map(|(_, entry)| entry)
    }

    /// Row ID of the newest confirmed entry.
    pub fn newest_row_id(&self) -> Option<i64> {
        self.entries
            .range(..TimelineKey::Pending(0))
            .next_back()
            .and_then(|(key, _)| key.row_id())
    }

    /// Row ID of the oldest confirmed entry.
    pub fn oldest_row_id(&self) -> Option<i64> {
        self.entries.keys().next().and_then(|key| key.row_id())
    }

    /// Newest row delivered through sync or history, ignoring confirmed local echoes.
    pub fn delivered_tail(&self) -> Option<i64> {
        self.delivered_tail
    }

    /// Append live rows that are strictly newer than the delivered tail.
    ///
    /// Rows already present as confirmed local echoes are de-duplicated by key.
    pub fn append_newer(&mut self, events: Vec<TimelineEvent>) -> InsertReport {
        let mut report = InsertReport::default();
        for event in events {
            if let Some(tail) = self.delivered_tail
                && event.row_id <= tail
            {
                debug!(
                    row_id = event.row_id,
                    tail, "discarding live row not newer than timeline tail"
                );
                report.discarded += 1;
                continue;
            }
            self.delivered_tail = Some(event.row_id);
            self.insert_confirmed(event, &mut report);
        }
        report
    }

    /// Insert history rows that are strictly older than the confirmed head.
    pub fn prepend_older(&mut self, mut events: Vec<TimelineEvent>) -> InsertReport {
        let mut report = InsertReport::default();
        let boundary = self.oldest_row_id();
        events.sort_by_key(|event| std::cmp::Reverse(event.row_id));
        for event in events {
            if let Some(oldest) = boundary
                && event.row_id >= oldest
            {
                debug!(
                    row_id = event.row_id,
                    oldest, "discarding history row overlapping timeline head"
                );
                report.discarded += 1;
                continue;
            }
            if self.delivered_tail.is_none_or(|tail| event.row_id > tail) {
                self.delivered_tail = Some(event.row_id);
            }
            self.insert_confirmed(event, &mut report);
        }
        report
    }

    /// Add a local echo at the tail. Re-adding a known transaction is a no-op.
    pub fn push_pending(&mut self, echo: LocalEcho) -> TimelineKey {
        if let Some(key) = self.by_txn_id.get(&echo.transaction_id) {
            return *key;
        }

        let key = TimelineKey::Pending(self.next_pending_seq);
        self.next_pending_seq += 1;
        self.by_txn_id.insert(echo.transaction_id.clone(), key);
        self.entries.insert(
            key,
            TimelineEntry {
                key,
                event: TimelineEvent {
                    row_id: 0,
                    event_id: String::new(),
                    sender: echo.sender,
                    event_type: echo.event_type,
                    state_key: None,
                    timestamp_ms: echo.timestamp_ms,
                    content: echo.content,
                    decrypted: None,
                    decrypted_type: None,
                    decryption_error: None,
                    transaction_id: Some(echo.transaction_id),
                },
                send_state: SendState::Sending,
            },
        );
        key
    }

    /// Move a local echo to its confirmed row.
    pub fn confirm_pending(
        &mut self,
        transaction_id: &str,
        event_id: &str,
        row_id: i64,
        timestamp_ms: Option<u64>,
    ) -> ConfirmOutcome {
        let confirmed_key = TimelineKey::Confirmed(row_id);
        let Some(pending_key) = self.by_txn_id.get(transaction_id).copied() else {
            return match self.by_event_id.get(event_id) {
                Some(key) => ConfirmOutcome::AlreadyConfirmed(*key),
                None => ConfirmOutcome::Unknown,
            };
        };
        if !pending_key.is_pending() {
            return ConfirmOutcome::AlreadyConfirmed(pending_key);
        }

        let Some(mut entry) = self.entries.remove(&pending_key) else {
            self.by_txn_id.remove(transaction_id);
            return ConfirmOutcome::Unknown;
        };

        if let Some(existing) = self.entries.get(&confirmed_key) {
            debug!(
                transaction_id,
                row_id,
                existing_event_id = %existing.event.event_id,
                "confirmed row already present; dropping local echo"
            );
            self.by_txn_id.insert(transaction_id.to_owned(), confirmed_key);
            return ConfirmOutcome::AlreadyConfirmed(confirmed_key);
        }

        entry.key = confirmed_key;
        entry.event.row_id = row_id;
        entry.event.event_id = event_id.to_owned();
        if let Some(timestamp_ms) = timestamp_ms {
            entry.event.timestamp_ms = timestamp_ms;
        }
        entry.send_state = SendState::Confirmed;

        self.by_event_id.insert(event_id.to_owned(), confirmed_key);
        self.by_txn_id.insert(transaction_id.to_owned(), confirmed_key);
        self.entries.insert(confirmed_key, entry);
        ConfirmOutcome::Promoted(confirmed_key)
    }

    /// Mark a local echo as failed. Returns `false` when no such echo exists.
    pub fn fail_pending(&mut self, transaction_id: &str, error: &str) -> bool {
        let Some(key) = self.by_txn_id.get(transaction_id).copied() else {
            return false;
        };
        match self.entries.get_mut(&key) {
            Some(entry) if key.is_pending() => {
                entry.send_state = SendState::Failed(error.to_owned());
                true
            }
            _ => false,
        }
    }

    /// Remove a failed local echo.
    pub fn remove_failed(&mut self, transaction_id: &str) -> bool {
        let Some(key) = self.by_txn_id.get(transaction_id).copied() else {
            return false;
        };
        let is_failed = self
            .entries
            .get(&key)
            .is_some_and(|entry| matches!(entry.send_state, SendState::Failed(_)));
        if !is_failed {
            return false;
        }
        self.entries.remove(&key);
        self.by_txn_id.remove(transaction_id);
        true
    }

    /// Replace decrypted content of a confirmed row in place.
    pub fn set_decrypted(&mut self, row_id: i64, decrypted: Value, decrypted_type: String) -> bool {
        match self.entries.get_mut(&TimelineKey::Confirmed(row_id)) {
            Some(entry) => {
                entry.event.decrypted = Some(decrypted);
                entry.event.decrypted_type = Some(decrypted_type);
                entry.event.decryption_error = None;
                true
            }
            None => false,
        }
    }

    /// Drop every confirmed row, keeping local echoes.
    pub fn clear_confirmed(&mut self) {
        self.entries.retain(|key, _| key.is_pending());
        self.by_event_id.clear();
        self.by_txn_id.retain(|_, key| key.is_pending());
        self.delivered_tail = None;
    }

    /// Clamp a requested pagination limit against safety and server caps.
    ///
    /// The result is always in `1..=100`.
    pub fn bounded_paginate_limit(requested: u16, server_cap: u16) -> u16 {
        let safe_requested = requested.max(1);
        let safe_cap = server_cap.max(1);
        safe_requested.min(safe_cap).min(MAX_PAGINATE_LIMIT)
    }

    fn insert_confirmed(&mut self, event: TimelineEvent, report: &mut InsertReport) {
        let key = TimelineKey::Confirmed(event.row_id);
        if self.entries.contains_key(&key) || self.by_event_id.contains_key(&event.event_id) {
            report.discarded += 1;
            return;
        }

        if let Some(transaction_id) = event.transaction_id.as_deref() {
            match self.by_txn_id.get(transaction_id).copied() {
                Some(pending_key) if pending_key.is_pending() => {
                    self.entries.remove(&pending_key);
                    self.by_txn_id.insert(transaction_id.to_owned(), key);
                    report.promoted.push(transaction_id.to_owned());
                }
                Some(_) => {}
                // Remote echo seen first; a late local echo must resolve to this row.
                None => {
                    self.by_txn_id.insert(transaction_id.to_owned(), key);
                }
            }
        }

        self.by_event_id.insert(event.event_id.clone(), key);
        self.entries.insert(
            key,
            TimelineEntry {
                key,
                event,
                send_state: SendState::Confirmed,
            },
        );
        report.inserted.push(key);
    }
}
