use thiserror::Error;

/// Rejections raised before a message ever reaches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message content is empty")]
    EmptyContent,

    #[error("Cannot send a message to yourself")]
    SelfAddressed,

    #[error("Message too long: {len} bytes (max {max})")]
    ContentTooLong { len: usize, max: usize },
}
