//! The list of conversations shown next to the message pane.
//!
//! A conversation is keyed by the counterpart's user id: there are no group
//! conversations, so the counterpart alone identifies the pair. Entries are
//! derived, never persisted. They are introduced from navigation context
//! ("ask this farmer about this product"), seeded from the store's
//! per-counterpart summaries, and refreshed from fetched histories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agrimarket_shared::constants::{PLACEHOLDER_AVATAR, SELF_LABEL, UNKNOWN_PARTICIPANT_LABEL};
use agrimarket_shared::{AppRole, Message, Profile, UserId};
use agrimarket_store::ConversationSummary;

/// A product listing a conversation was started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
    pub name: String,
}

/// Hint handed over by the marketplace when a buyer contacts a seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalContext {
    pub counterpart_id: UserId,
    pub counterpart_name: String,
    pub counterpart_role: AppRole,
    pub product: ProductRef,
    pub phone: Option<String>,
    pub avatar: Option<String>,
}

impl ExternalContext {
    /// Suggested first message for a conversation opened from a listing.
    pub fn opening_draft(&self) -> String {
        format!(
            "Hi! I'm interested in your {}. Can you provide more details?",
            self.product.name
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Counterpart user id.
    pub id: UserId,
    pub participant_name: String,
    pub participant_role: Option<AppRole>,
    /// Content of the most recent message, or a synthesized hint.
    pub last_message: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub avatar: Option<String>,
    pub product: Option<ProductRef>,
    pub phone: Option<String>,
}

impl Conversation {
    fn unnamed(id: UserId) -> Self {
        Self {
            id,
            participant_name: UNKNOWN_PARTICIPANT_LABEL.to_string(),
            participant_role: None,
            last_message: String::new(),
            last_message_at: None,
            unread_count: 0,
            avatar: None,
            product: None,
            phone: None,
        }
    }

    fn apply_profile(&mut self, profile: &Profile) {
        self.participant_name = profile.full_name.clone();
        self.participant_role = Some(profile.user_type);
        if profile.avatar_url.is_some() {
            self.avatar = profile.avatar_url.clone();
        }
        if profile.phone_number.is_some() {
            self.phone = profile.phone_number.clone();
        }
    }
}

/// Ordered conversation list plus the current selection.
#[derive(Debug, Default)]
pub struct ConversationIndex {
    conversations: Vec<Conversation>,
    selected: Option<UserId>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }

    pub fn get(&self, id: UserId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: UserId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Create the conversation described by `context` unless one with the
    /// same counterpart already exists, then select it.
    ///
    /// New entries go to the top of the list.
    pub fn upsert_from_external_context(&mut self, context: &ExternalContext) -> &Conversation {
        let id = context.counterpart_id;
        if self.get(id).is_none() {
            tracing::info!(
                counterpart = %id.short(),
                product = %context.product.name,
                "conversation started from listing"
            );
            self.conversations.insert(
                0,
                Conversation {
                    id,
                    participant_name: context.counterpart_name.clone(),
                    participant_role: Some(context.counterpart_role),
                    last_message: format!("Interested in {}", context.product.name),
                    last_message_at: None,
                    unread_count: 0,
                    avatar: Some(
                        context
                            .avatar
                            .clone()
                            .unwrap_or_else(|| PLACEHOLDER_AVATAR.to_string()),
                    ),
                    product: Some(context.product.clone()),
                    phone: context.phone.clone(),
                },
            );
        }
        self.selected = Some(id);

        // The entry exists: either found above or just inserted at the front.
        let pos = self.position(id).unwrap_or(0);
        &self.conversations[pos]
    }

    /// Add or refresh the entry for a store summary. New entries are
    /// appended, so seeding from summaries keeps their recency order.
    pub fn upsert_summary(&mut self, summary: &ConversationSummary, profile: Option<&Profile>) {
        let id = summary.counterpart_id;
        if self.get(id).is_none() {
            self.conversations.push(Conversation::unnamed(id));
        }
        if let Some(conversation) = self.get_mut(id) {
            conversation.last_message = summary.last_message.content.clone();
            conversation.last_message_at = Some(summary.last_message.created_at);
            conversation.unread_count = summary.unread_count;
            if let Some(profile) = profile {
                conversation.apply_profile(profile);
            }
        }
    }

    /// Update name, role, avatar and phone from a profile. Returns `false`
    /// when there is no conversation with that user.
    pub fn apply_profile(&mut self, profile: &Profile) -> bool {
        match self.get_mut(profile.user_id) {
            Some(conversation) => {
                conversation.apply_profile(profile);
                true
            }
            None => false,
        }
    }

    /// Recompute the derived attributes of `counterpart`'s conversation from
    /// its full message set.
    ///
    /// Idempotent: applying the same history twice leaves the entry
    /// unchanged. An empty history keeps the synthesized preview.
    pub fn apply_history(&mut self, counterpart: UserId, me: UserId, messages: &[Message]) -> bool {
        let Some(conversation) = self.get_mut(counterpart) else {
            return false;
        };

        let own: Vec<&Message> = messages
            .iter()
            .filter(|m| m.is_between(me, counterpart))
            .collect();

        conversation.unread_count = own.iter().filter(|m| m.is_unread_for(me)).count() as u32;
        if let Some(last) = own.last() {
            conversation.last_message = last.content.clone();
            conversation.last_message_at = Some(last.created_at);
        }
        true
    }

    /// Select an existing conversation. Unknown ids leave the selection
    /// unchanged.
    pub fn select(&mut self, id: UserId) -> bool {
        if self.get(id).is_some() {
            self.selected = Some(id);
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected_id(&self) -> Option<UserId> {
        self.selected
    }

    pub fn selected(&self) -> Option<&Conversation> {
        self.selected.and_then(|id| self.get(id))
    }

    /// Conversations whose participant name contains `term`, ignoring case,
    /// in list order.
    pub fn filter(&self, term: &str) -> Vec<&Conversation> {
        let needle = term.to_lowercase();
        self.conversations
            .iter()
            .filter(|c| c.participant_name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Phone number to show for the counterpart, when one is known.
    pub fn contact(&self, id: UserId) -> Option<&str> {
        self.get(id).and_then(|c| c.phone.as_deref())
    }

    /// How a message author is shown: "You", the counterpart's name, or a
    /// generic label.
    pub fn sender_label(&self, sender: UserId, me: UserId) -> &str {
        if sender == me {
            return SELF_LABEL;
        }
        match self.get(sender) {
            Some(c) => c.participant_name.as_str(),
            None => UNKNOWN_PARTICIPANT_LABEL,
        }
    }

    fn position(&self, id: UserId) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }
}
