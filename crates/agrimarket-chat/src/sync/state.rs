//! Pure synchronization state for one selected conversation.
//!
//! No I/O happens here. The actor asks for a [`FetchTicket`] before every
//! history query and hands the result back with that ticket; results whose
//! ticket no longer matches the current identity and selection are
//! discarded. Responses can complete in any order, so the ticket, not the
//! arrival order, decides what is applied.
//!
//! Every applied fetch replaces the materialized list wholesale. Pending
//! (optimistically appended) messages survive a replacement until the
//! store has confirmed them and the fetched rows contain their stored row.

use chrono::{DateTime, Utc};

use agrimarket_shared::{Message, MessageId, NewMessage, UserId};
use agrimarket_store::{ChangeEvent, StoreError};

use crate::error::SyncError;

/// Context a history fetch was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub self_id: UserId,
    pub counterpart: UserId,
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// The list was replaced.
    Applied,
    /// Issued under a selection or identity that is no longer current.
    Stale,
    /// The store failed; the previous list is kept.
    Failed(StoreError),
}

/// A send that passed validation and is on its way to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub temp_id: MessageId,
    pub counterpart: UserId,
    pub message: NewMessage,
    /// Content exactly as typed, kept so a failed send can be retried.
    pub draft: String,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    temp_id: MessageId,
    message: Message,
    /// Set once the store returned the authoritative row.
    confirmed: bool,
}

#[derive(Debug)]
pub struct SyncState {
    identity: Option<UserId>,
    selected: Option<UserId>,
    messages: Vec<Message>,
    pending: Vec<PendingEntry>,
    optimistic: bool,
    granularity_micros: i64,
}

impl SyncState {
    pub fn new(optimistic: bool, granularity_micros: i64) -> Self {
        Self {
            identity: None,
            selected: None,
            messages: Vec::new(),
            pending: Vec::new(),
            optimistic,
            granularity_micros: granularity_micros.max(1),
        }
    }

    pub fn identity(&self) -> Option<UserId> {
        self.identity
    }

    pub fn selected(&self) -> Option<UserId> {
        self.selected
    }

    /// Record an identity transition. A different user never sees the
    /// previous user's messages, so the list is dropped on change.
    pub fn set_identity(&mut self, identity: Option<UserId>) -> bool {
        if self.identity == identity {
            return false;
        }
        self.identity = identity;
        self.reset_view();
        true
    }

    /// Switch to another conversation. Returns whether the selection
    /// changed; results for the previous one are stale from now on.
    pub fn select(&mut self, counterpart: UserId) -> bool {
        if self.selected == Some(counterpart) {
            return false;
        }
        self.selected = Some(counterpart);
        self.reset_view();
        true
    }

    pub fn clear_selection(&mut self) -> bool {
        if self.selected.is_none() {
            return false;
        }
        self.selected = None;
        self.reset_view();
        true
    }

    fn reset_view(&mut self) {
        self.messages.clear();
        self.pending.clear();
    }

    pub fn begin_fetch(&self) -> Result<FetchTicket, SyncError> {
        let self_id = self.identity.ok_or(SyncError::AbsentIdentity)?;
        let counterpart = self.selected.ok_or(SyncError::NoSelection)?;
        Ok(FetchTicket {
            self_id,
            counterpart,
        })
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.identity == Some(ticket.self_id) && self.selected == Some(ticket.counterpart)
    }

    pub fn apply_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Message>, StoreError>,
    ) -> FetchOutcome {
        if !self.is_current(&ticket) {
            return FetchOutcome::Stale;
        }
        let rows = match result {
            Ok(rows) => rows,
            Err(e) => return FetchOutcome::Failed(e),
        };

        self.reconcile_pending(&rows);
        self.messages = rows;
        FetchOutcome::Applied
    }

    /// Drop confirmed pending entries that the fetched rows now account for.
    ///
    /// A confirmed entry matches its stored row by id, or on sender,
    /// recipient, content and the store timestamp truncated to the store's
    /// granularity. An unconfirmed entry has no store identity yet and is
    /// never matched: an identical older message must not absorb it.
    /// [`confirm_send`](Self::confirm_send) removes it once the row is in.
    fn reconcile_pending(&mut self, rows: &[Message]) {
        if self.pending.is_empty() {
            return;
        }

        let mut claimed = vec![false; rows.len()];
        let granularity = self.granularity_micros;

        self.pending.retain(|entry| {
            if !entry.confirmed {
                return true;
            }
            let found = rows.iter().enumerate().position(|(i, row)| {
                !claimed[i]
                    && same_payload(row, &entry.message)
                    && (row.id == entry.message.id
                        || truncate(row.created_at, granularity)
                            == truncate(entry.message.created_at, granularity))
            });
            match found {
                Some(i) => {
                    claimed[i] = true;
                    false
                }
                None => true,
            }
        });
    }

    /// Whether a change notification should trigger a re-fetch.
    pub fn is_relevant(&self, event: &ChangeEvent) -> bool {
        match self.identity {
            Some(me) => self.selected.is_some() && event.touches(me),
            None => false,
        }
    }

    /// Validate an outgoing message and, in optimistic mode, append a
    /// pending copy to the view.
    pub fn begin_send(&mut self, raw_content: &str) -> Result<PendingSend, SyncError> {
        let self_id = self.identity.ok_or(SyncError::AbsentIdentity)?;
        let counterpart = self.selected.ok_or(SyncError::NoSelection)?;
        let message = NewMessage::validated(self_id, counterpart, raw_content)?;

        let pending = PendingSend {
            temp_id: MessageId::new(),
            counterpart,
            message,
            draft: raw_content.to_string(),
        };

        if self.optimistic {
            self.pending.push(PendingEntry {
                temp_id: pending.temp_id,
                message: Message {
                    id: pending.temp_id,
                    sender_id: self_id,
                    recipient_id: counterpart,
                    content: pending.message.content.clone(),
                    created_at: Utc::now(),
                    is_read: false,
                },
                confirmed: false,
            });
        }
        Ok(pending)
    }

    /// Replace the pending entry with the stored row. Returns whether the
    /// view changed.
    pub fn confirm_send(&mut self, temp_id: MessageId, stored: Message) -> bool {
        let Some(pos) = self.pending.iter().position(|p| p.temp_id == temp_id) else {
            return false;
        };
        if self.messages.iter().any(|m| m.id == stored.id) {
            // A refresh already brought the row in.
            self.pending.remove(pos);
        } else {
            let entry = &mut self.pending[pos];
            entry.message = stored;
            entry.confirmed = true;
        }
        true
    }

    /// Remove the pending entry of a failed send. Returns whether the view
    /// changed.
    pub fn fail_send(&mut self, temp_id: MessageId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.temp_id != temp_id);
        self.pending.len() != before
    }

    /// Materialized view: fetched rows, then pending ones.
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .cloned()
            .chain(self.pending.iter().map(|p| p.message.clone()))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Incoming messages in the current view that are still unread.
    pub fn has_unread(&self) -> bool {
        match self.identity {
            Some(me) => self.messages.iter().any(|m| m.is_unread_for(me)),
            None => false,
        }
    }
}

fn same_payload(a: &Message, b: &Message) -> bool {
    a.sender_id == b.sender_id && a.recipient_id == b.recipient_id && a.content == b.content
}

fn truncate(ts: DateTime<Utc>, granularity_micros: i64) -> i64 {
    ts.timestamp_micros().div_euclid(granularity_micros)
}
