//! Store configuration.
//!
//! The name of the recipient column differs between deployments of the
//! marketplace schema (`receiver_id` in the generated types, `recipient_id`
//! in some queries), so it is a configuration detail rather than a
//! hard-coded identifier.

use agrimarket_shared::constants::{DEFAULT_FEED_CAPACITY, MESSAGES_CHANNEL};

use crate::error::{Result, StoreError};

/// Default name of the column holding the message recipient.
pub const DEFAULT_RECIPIENT_COLUMN: &str = "receiver_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Column holding the recipient user id in the `messages` table.
    pub recipient_column: String,

    /// Number of change events buffered per subscriber before it lags.
    pub feed_capacity: usize,

    /// Name of the change-feed channel.
    pub channel_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            recipient_column: DEFAULT_RECIPIENT_COLUMN.to_string(),
            feed_capacity: DEFAULT_FEED_CAPACITY,
            channel_name: MESSAGES_CHANNEL.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn with_recipient_column(mut self, column: impl Into<String>) -> Self {
        self.recipient_column = column.into();
        self
    }

    /// Check the configuration before it is spliced into SQL.
    pub fn validate(&self) -> Result<()> {
        if !is_plain_identifier(&self.recipient_column) {
            return Err(StoreError::InvalidConfig(format!(
                "recipient column {:?} is not a plain SQL identifier",
                self.recipient_column
            )));
        }
        if matches!(
            self.recipient_column.as_str(),
            "id" | "sender_id" | "content" | "created_at" | "is_read"
        ) {
            return Err(StoreError::InvalidConfig(format!(
                "recipient column {:?} collides with another messages column",
                self.recipient_column
            )));
        }
        if self.feed_capacity == 0 {
            return Err(StoreError::InvalidConfig(
                "feed capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
