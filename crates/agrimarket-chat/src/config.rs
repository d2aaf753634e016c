//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the chat client can start with nothing
//! but a signed-in user id.

use std::path::PathBuf;

use agrimarket_shared::constants::STORE_TIMESTAMP_GRANULARITY_MICROS;
use agrimarket_shared::UserId;
use agrimarket_store::StoreConfig;

/// Behaviour of the conversation synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Append a pending message locally before the store confirms it.
    /// Env: `AGRIMARKET_OPTIMISTIC_SEND` (true/false)
    /// Default: `true`
    pub optimistic_send: bool,

    /// Flag incoming messages as read while their conversation is open.
    /// Env: `AGRIMARKET_MARK_READ_ON_OPEN` (true/false)
    /// Default: `true`
    pub mark_read_while_open: bool,

    /// Timestamp granularity of the store, used when matching confirmed
    /// pending messages against fetched rows.
    pub timestamp_granularity_micros: i64,

    /// Capacity of the command channel into the synchronizer task.
    pub command_buffer: usize,

    /// Capacity of the notification channel out of the synchronizer task.
    pub notification_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            optimistic_send: true,
            mark_read_while_open: true,
            timestamp_granularity_micros: STORE_TIMESTAMP_GRANULARITY_MICROS,
            command_buffer: 64,
            notification_buffer: 256,
        }
    }
}

/// Everything the terminal client needs to start.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// SQLite database file.
    /// Env: `AGRIMARKET_DB_PATH`
    /// Default: platform data directory (see [`agrimarket_store::database::default_path`]).
    pub db_path: Option<PathBuf>,

    /// The signed-in user.
    /// Env: `AGRIMARKET_USER_ID`
    pub user_id: Option<UserId>,

    /// Counterpart to open on startup.
    /// Env: `AGRIMARKET_PEER_ID`
    pub peer_id: Option<UserId>,

    /// Product the conversation is about, when opened from a listing.
    /// Env: `AGRIMARKET_PRODUCT_ID`, `AGRIMARKET_PRODUCT_NAME`
    pub product: Option<(String, String)>,

    pub store: StoreConfig,

    pub sync: SyncConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("AGRIMARKET_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        config.user_id = parse_user(&lookup, "AGRIMARKET_USER_ID");
        config.peer_id = parse_user(&lookup, "AGRIMARKET_PEER_ID");

        if let Some(name) = lookup("AGRIMARKET_PRODUCT_NAME") {
            let id = lookup("AGRIMARKET_PRODUCT_ID").unwrap_or_else(|| name.clone());
            config.product = Some((id, name));
        }

        if let Some(column) = lookup("AGRIMARKET_RECIPIENT_COLUMN") {
            let candidate = config.store.clone().with_recipient_column(column.trim());
            match candidate.validate() {
                Ok(()) => config.store = candidate,
                Err(e) => tracing::warn!(
                    value = %column,
                    error = %e,
                    "Invalid AGRIMARKET_RECIPIENT_COLUMN, using default"
                ),
            }
        }

        if let Some(val) = lookup("AGRIMARKET_FEED_CAPACITY") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.store.feed_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid AGRIMARKET_FEED_CAPACITY, using default"),
            }
        }

        if let Some(val) = lookup("AGRIMARKET_OPTIMISTIC_SEND") {
            config.sync.optimistic_send = parse_flag(&val);
        }

        if let Some(val) = lookup("AGRIMARKET_MARK_READ_ON_OPEN") {
            config.sync.mark_read_while_open = parse_flag(&val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_user<F>(lookup: &F, key: &str) -> Option<UserId>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.parse::<UserId>() {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "Invalid user id, ignoring");
            None
        }
    }
}

fn parse_flag(val: &str) -> bool {
    let val = val.trim();
    !(val.eq_ignore_ascii_case("false") || val == "0")
}
