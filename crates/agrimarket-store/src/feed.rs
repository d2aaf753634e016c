//! Row-level change feed for the `messages` table.
//!
//! Every write publishes a [`ChangeEvent`] on a named broadcast channel.
//! Subscribers hold a [`ChangeSubscription`]; dropping it releases the
//! channel slot. Delivery is best effort: a subscriber that falls behind
//! skips events and is told how many it lost, so it can resynchronise
//! instead of trusting the gap.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace, Level};

use agrimarket_shared::UserId;

use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Row image after the change (absent for deletes).
    pub new: Option<Message>,
    /// Row image before the change (absent for inserts).
    pub old: Option<Message>,
}

impl ChangeEvent {
    pub fn insert(row: Message) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    pub fn update(old: Message, new: Message) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(new),
            old: Some(old),
        }
    }

    pub fn delete(row: Message) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(row),
        }
    }

    /// The most relevant image of the changed row: the new one, or the old
    /// one for deletes.
    pub fn row(&self) -> Option<&Message> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// Whether `user` is the sender or recipient of the changed row.
    pub fn touches(&self, user: UserId) -> bool {
        self.row().map_or(false, |row| row.involves(user))
    }
}

/// Outcome of waiting on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRecv {
    Event(ChangeEvent),
    /// The subscriber fell behind and `n` events were dropped.
    Lagged(u64),
    /// The publishing side is gone.
    Closed,
}

/// Publishing side of a change feed.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    name: String,
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            tx,
        }
    }

    /// Deliver `event` to every current subscriber. Returns how many
    /// subscribers received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        if tracing::enabled!(Level::TRACE) {
            if let Ok(payload) = serde_json::to_string(&event) {
                trace!(channel = %self.name, %payload, "change payload");
            }
        }
        // An error only means nobody is listening.
        let delivered = self.tx.send(event).unwrap_or(0);
        debug!(channel = %self.name, subscribers = delivered, "change published");
        delivered
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        debug!(channel = %self.name, "subscribed");
        ChangeSubscription {
            channel: self.name.clone(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live subscription. Drop it to unsubscribe.
#[derive(Debug)]
pub struct ChangeSubscription {
    channel: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn recv(&mut self) -> FeedRecv {
        match self.rx.recv().await {
            Ok(event) => FeedRecv::Event(event),
            Err(broadcast::error::RecvError::Lagged(n)) => FeedRecv::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => FeedRecv::Closed,
        }
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        debug!(channel = %self.channel, "unsubscribed");
    }
}
