//! # agrimarket-store
//!
//! The message store the conversation core talks to. The crate defines the
//! [`MessageStore`] contract (pair queries, inserts, read-flag updates and
//! a table-scoped change feed) and ships a SQLite implementation whose
//! change feed is an in-process broadcast channel.
//!
//! The synchronous [`Database`] handle wraps a `rusqlite::Connection` and
//! provides the typed CRUD helpers; [`SqliteStore`] puts it behind the
//! async trait and publishes a [`ChangeEvent`] for every write.

pub mod config;
pub mod database;
pub mod feed;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod profiles;
pub mod store;

mod error;

pub use config::StoreConfig;
pub use database::Database;
pub use error::{Result, StoreError};
pub use feed::{ChangeEvent, ChangeFeed, ChangeKind, ChangeSubscription, FeedRecv};
pub use models::*;
pub use store::{MessageStore, SqliteStore};
