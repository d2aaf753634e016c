//! Records returned by the store.
//!
//! Messages and profiles are the shared domain types; the store adds the
//! per-counterpart summary used to seed a conversation list.

use serde::{Deserialize, Serialize};

pub use agrimarket_shared::types::{Message, NewMessage, Profile};
use agrimarket_shared::UserId;

/// Latest activity with one counterpart, seen from the querying user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub counterpart_id: UserId,
    /// Most recent message exchanged with the counterpart.
    pub last_message: Message,
    /// Messages from the counterpart that the querying user has not read.
    pub unread_count: u32,
}
