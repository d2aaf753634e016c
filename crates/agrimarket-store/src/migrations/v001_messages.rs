//! v001 -- Direct messages table.
//!
//! The recipient column name comes from [`StoreConfig`](crate::StoreConfig)
//! and has already been validated as a plain identifier.

use rusqlite::Connection;

/// Apply the initial migration.
pub fn up(conn: &Connection, recipient_column: &str) -> Result<(), rusqlite::Error> {
    conn.execute_batch(&format!(
        r#"
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender_id   TEXT NOT NULL,               -- auth user UUID
    {rc}        TEXT NOT NULL,               -- auth user UUID
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL,               -- RFC-3339, microsecond precision
    is_read     INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1

    CHECK (sender_id <> {rc})
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, {rc}, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_recipient_unread
    ON messages({rc}, is_read);
"#,
        rc = recipient_column
    ))
}
