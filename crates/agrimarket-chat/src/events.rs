use serde::Serialize;

use agrimarket_shared::{Message, UserId};

/// Notifications sent *from* the synchronizer task to the application.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncNotification {
    /// The session identity changed (signed in, signed out, switched).
    IdentityChanged { identity: Option<UserId> },

    /// A different conversation (or none) is now selected.
    SelectionChanged { counterpart: Option<UserId> },

    /// An authoritative fetch replaced the message list.
    HistoryReplaced {
        counterpart: UserId,
        messages: Vec<Message>,
    },

    /// The list changed locally: a pending message was appended, confirmed
    /// or withdrawn.
    ViewUpdated {
        counterpart: UserId,
        messages: Vec<Message>,
    },

    /// A non-fatal failure to show the user.
    Notice(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
    /// Content of a failed send, handed back for a retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
}

impl Notice {
    pub fn fetch_failed(description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: "Error fetching messages".into(),
            description: description.into(),
            draft: None,
        }
    }

    pub fn send_failed(description: impl Into<String>, draft: String) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: "Error sending message".into(),
            description: description.into(),
            draft: Some(draft),
        }
    }

    pub fn mark_read_failed(description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: "Error updating read status".into(),
            description: description.into(),
            draft: None,
        }
    }

    pub fn chat_started(participant: &str) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: "Chat Started".into(),
            description: format!("Started conversation with {participant}"),
            draft: None,
        }
    }
}
