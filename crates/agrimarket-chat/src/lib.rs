//! # agrimarket-chat
//!
//! Keeps one conversation between two marketplace users consistent with
//! the shared message store.
//!
//! - [`sync`]: the synchronizer task. It fetches the selected conversation,
//!   refetches on relevant change-feed events, sends messages (optionally
//!   appending them before the store confirms) and discards results that
//!   arrive after the user switched conversation or session.
//! - [`index`]: the list of conversations shown next to the open one.
//! - [`config`]: environment-driven client settings.

pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod logging;
pub mod sync;

pub use config::{ClientConfig, SyncConfig};
pub use error::SyncError;
pub use events::{Notice, NoticeLevel, SyncNotification};
pub use index::{Conversation, ConversationIndex, ExternalContext, ProductRef};
pub use sync::{spawn_synchronizer, SyncHandle, SyncSnapshot};
