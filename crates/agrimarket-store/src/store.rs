//! The async store contract and its SQLite implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use agrimarket_shared::UserId;

use crate::config::StoreConfig;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeSubscription};
use crate::models::{ConversationSummary, Message, NewMessage, Profile};

/// A relational message table with a change feed.
///
/// Implementations are shared by every client of the marketplace; no call
/// spans a transaction with another.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Every message exchanged between `a` and `b` in either direction,
    /// ordered by `created_at` ascending with ties in insertion order.
    async fn fetch_conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>>;

    /// Insert a message; `id`, `created_at` and `is_read` are assigned by
    /// the store.
    async fn insert_message(&self, message: NewMessage) -> Result<Message>;

    /// Flag every message from `counterpart` to `me` as read. Returns the
    /// number of rows changed.
    async fn mark_read(&self, me: UserId, counterpart: UserId) -> Result<usize>;

    async fn conversation_summaries(&self, me: UserId) -> Result<Vec<ConversationSummary>>;

    async fn profile(&self, user: UserId) -> Result<Option<Profile>>;

    /// Subscribe to row changes on the messages table.
    fn subscribe(&self) -> ChangeSubscription;
}

/// [`MessageStore`] over a local SQLite database.
///
/// Queries run on the blocking pool; writes publish on the change feed
/// after they commit.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub fn new(db: Database, config: &StoreConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            feed: ChangeFeed::new(config.channel_name.clone(), config.feed_capacity),
        }
    }

    pub fn open_at(path: &Path, config: &StoreConfig) -> Result<Self> {
        Ok(Self::new(Database::open_at(path, config)?, config))
    }

    pub fn open_in_memory(config: &StoreConfig) -> Result<Self> {
        Ok(Self::new(Database::open_in_memory(config)?, config))
    }

    /// The feed this store publishes on.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub async fn upsert_profile(&self, profile: Profile) -> Result<()> {
        self.with_db(move |db| db.upsert_profile(&profile)).await
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("Lock poisoned: {e}")))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn fetch_conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let messages = self.with_db(move |db| db.get_conversation(a, b)).await?;
        debug!(a = %a.short(), b = %b.short(), count = messages.len(), "conversation fetched");
        Ok(messages)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        let stored = self.with_db(move |db| db.insert_message(&message)).await?;
        info!(
            msg_id = %stored.id,
            sender = %stored.sender_id.short(),
            recipient = %stored.recipient_id.short(),
            "message stored"
        );
        self.feed.publish(ChangeEvent::insert(stored.clone()));
        Ok(stored)
    }

    async fn mark_read(&self, me: UserId, counterpart: UserId) -> Result<usize> {
        let updated = self
            .with_db(move |db| db.mark_conversation_read(me, counterpart))
            .await?;
        for new in &updated {
            let old = Message {
                is_read: false,
                ..new.clone()
            };
            self.feed.publish(ChangeEvent::update(old, new.clone()));
        }
        if !updated.is_empty() {
            info!(
                me = %me.short(),
                counterpart = %counterpart.short(),
                count = updated.len(),
                "messages marked read"
            );
        }
        Ok(updated.len())
    }

    async fn conversation_summaries(&self, me: UserId) -> Result<Vec<ConversationSummary>> {
        self.with_db(move |db| db.conversation_summaries(me)).await
    }

    async fn profile(&self, user: UserId) -> Result<Option<Profile>> {
        self.with_db(move |db| db.get_profile(user)).await
    }

    fn subscribe(&self) -> ChangeSubscription {
        self.feed.subscribe()
    }
}
