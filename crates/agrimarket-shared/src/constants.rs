/// Application name
pub const APP_NAME: &str = "AgriMarket";

/// Name of the change-feed channel scoped to the messages table
pub const MESSAGES_CHANNEL: &str = "public:messages";

/// Maximum message size in bytes (16 KiB)
pub const MAX_MESSAGE_LEN: usize = 16 * 1024;

/// Label used for messages written by the current user
pub const SELF_LABEL: &str = "You";

/// Label used when the counterpart has no profile
pub const UNKNOWN_PARTICIPANT_LABEL: &str = "Other User";

/// Avatar used for conversations introduced without one
pub const PLACEHOLDER_AVATAR: &str = "/placeholder.svg";

/// Default buffered capacity of the change feed
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Store timestamp granularity in microseconds (Postgres `timestamptz`)
pub const STORE_TIMESTAMP_GRANULARITY_MICROS: i64 = 1;
