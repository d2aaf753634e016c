use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use agrimarket_shared::{MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ConversationSummary, Message, NewMessage};

impl Database {
    /// Insert a message with a store-assigned id.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        self.insert_message_with_id(MessageId::new(), new)
    }

    /// Insert a message with a client-supplied id.
    ///
    /// `created_at` and `is_read` are assigned here. Timestamps never go
    /// backwards relative to the previous insert, even if the wall clock
    /// does.
    pub fn insert_message_with_id(&self, id: MessageId, new: &NewMessage) -> Result<Message> {
        let mut created_at = truncate_to_micros(Utc::now());
        if let Some(last) = self.latest_created_at()? {
            created_at = created_at.max(last);
        }

        self.conn().execute(
            &format!(
                "INSERT INTO messages (id, sender_id, {rc}, content, created_at, is_read)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                rc = self.recipient_column()
            ),
            params![
                id.0.to_string(),
                new.sender_id.0.to_string(),
                new.recipient_id.0.to_string(),
                new.content,
                format_timestamp(created_at),
            ],
        )?;

        Ok(Message {
            id,
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            content: new.content.clone(),
            created_at,
            is_read: false,
        })
    }

    /// All messages exchanged between `a` and `b`, oldest first.
    ///
    /// Ties on `created_at` fall back to insertion order.
    pub fn get_conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, sender_id, {rc}, content, created_at, is_read
             FROM messages
             WHERE (sender_id = ?1 AND {rc} = ?2)
                OR (sender_id = ?2 AND {rc} = ?1)
             ORDER BY created_at ASC, rowid ASC",
            rc = self.recipient_column()
        ))?;

        let rows = stmt.query_map(params![a.0.to_string(), b.0.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT id, sender_id, {rc}, content, created_at, is_read
                     FROM messages WHERE id = ?1",
                    rc = self.recipient_column()
                ),
                params![id.0.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Mark every unread message from `counterpart` to `me` as read.
    ///
    /// Returns the updated rows (new images) so the caller can publish them.
    pub fn mark_conversation_read(&self, me: UserId, counterpart: UserId) -> Result<Vec<Message>> {
        let unread: Vec<Message> = self
            .get_conversation(me, counterpart)?
            .into_iter()
            .filter(|m| m.sender_id == counterpart && m.is_unread_for(me))
            .collect();

        if unread.is_empty() {
            return Ok(unread);
        }

        self.conn().execute(
            &format!(
                "UPDATE messages SET is_read = 1
                 WHERE sender_id = ?1 AND {rc} = ?2 AND is_read = 0",
                rc = self.recipient_column()
            ),
            params![counterpart.0.to_string(), me.0.to_string()],
        )?;

        Ok(unread
            .into_iter()
            .map(|m| Message { is_read: true, ..m })
            .collect())
    }

    /// One summary per counterpart `me` has exchanged messages with,
    /// most recently active first.
    pub fn conversation_summaries(&self, me: UserId) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, sender_id, {rc}, content, created_at, is_read
             FROM messages
             WHERE sender_id = ?1 OR {rc} = ?1
             ORDER BY created_at ASC, rowid ASC",
            rc = self.recipient_column()
        ))?;

        let rows = stmt.query_map(params![me.0.to_string()], row_to_message)?;

        // Position of each counterpart's latest row breaks timestamp ties.
        let mut by_counterpart: HashMap<UserId, (usize, ConversationSummary)> = HashMap::new();
        for (position, row) in rows.enumerate() {
            let message = row?;
            let counterpart = message.counterpart_of(me);
            let unread = u32::from(message.is_unread_for(me));
            match by_counterpart.get_mut(&counterpart) {
                Some((last_position, summary)) => {
                    *last_position = position;
                    summary.unread_count += unread;
                    summary.last_message = message;
                }
                None => {
                    by_counterpart.insert(
                        counterpart,
                        (
                            position,
                            ConversationSummary {
                                counterpart_id: counterpart,
                                last_message: message,
                                unread_count: unread,
                            },
                        ),
                    );
                }
            }
        }

        let mut summaries: Vec<(usize, ConversationSummary)> =
            by_counterpart.into_values().collect();
        summaries.sort_by(|(pa, a), (pb, b)| {
            b.last_message
                .created_at
                .cmp(&a.last_message.created_at)
                .then(pb.cmp(pa))
        });
        Ok(summaries.into_iter().map(|(_, s)| s).collect())
    }

    fn latest_created_at(&self) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> = self
            .conn()
            .query_row(
                "SELECT created_at FROM messages ORDER BY created_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        latest
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(StoreError::from)
            })
            .transpose()
    }
}

/// Timestamps are stored with microsecond precision so that a value read
/// back compares equal to the one returned by the insert.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(ts.nanosecond() / 1_000 * 1_000)
        .unwrap_or(ts)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let recipient_str: String = row.get(2)?;
    let content: String = row.get(3)?;
    let ts_str: String = row.get(4)?;
    let is_read: bool = row.get(5)?;

    let parse_uuid = |idx: usize, s: &str| {
        Uuid::parse_str(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        sender_id: UserId(parse_uuid(1, &sender_str)?),
        recipient_id: UserId(parse_uuid(2, &recipient_str)?),
        content,
        created_at,
        is_read,
    })
}
