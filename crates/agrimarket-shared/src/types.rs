use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_MESSAGE_LEN;
use crate::error::ValidationError;

// User identity = the auth provider's user UUID
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marketplace role attached to every profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    Admin,
    Farmer,
    Buyer,
}

impl AppRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Farmer => "farmer",
            Self::Buyer => "buyer",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "farmer" => Some(Self::Farmer),
            "buyer" => Some(Self::Buyer),
            _ => None,
        }
    }
}

impl std::fmt::Display for AppRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One directed text message between two marketplace users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl Message {
    /// Whether this message belongs to the conversation between `a` and `b`,
    /// in either direction.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }

    /// Whether `user` sent or received this message.
    pub fn involves(&self, user: UserId) -> bool {
        self.sender_id == user || self.recipient_id == user
    }

    /// The other party of the message, seen from `me`.
    pub fn counterpart_of(&self, me: UserId) -> UserId {
        if self.sender_id == me {
            self.recipient_id
        } else {
            self.sender_id
        }
    }

    pub fn is_unread_for(&self, me: UserId) -> bool {
        self.recipient_id == me && !self.is_read
    }
}

/// Insert payload. `id`, `created_at` and `is_read` are store defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
}

impl NewMessage {
    /// Build an insert payload from raw user input.
    ///
    /// The content is trimmed; empty, oversized and self-addressed messages
    /// are rejected here so they never reach the store.
    pub fn validated(
        sender_id: UserId,
        recipient_id: UserId,
        raw_content: &str,
    ) -> Result<Self, ValidationError> {
        if sender_id == recipient_id {
            return Err(ValidationError::SelfAddressed);
        }
        let content = raw_content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if content.len() > MAX_MESSAGE_LEN {
            return Err(ValidationError::ContentTooLong {
                len: content.len(),
                max: MAX_MESSAGE_LEN,
            });
        }
        Ok(Self {
            sender_id,
            recipient_id,
            content: content.to_string(),
        })
    }
}

/// Public profile of a marketplace user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user_id: UserId,
    pub full_name: String,
    pub user_type: AppRole,
    pub avatar_url: Option<String>,
    pub phone_number: Option<String>,
}
