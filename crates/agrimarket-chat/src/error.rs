use thiserror::Error;

use agrimarket_shared::ValidationError;
use agrimarket_store::StoreError;

/// Errors surfaced by the conversation synchronizer.
///
/// None of them is fatal: validation and store failures are recoverable by
/// retrying, and an absent identity only means the session has not been
/// resolved yet.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No authenticated user yet; the operation is deferred.
    #[error("No authenticated user")]
    AbsentIdentity,

    #[error("No conversation selected")]
    NoSelection,

    /// The synchronizer task has shut down.
    #[error("Synchronizer closed")]
    Closed,
}

impl SyncError {
    /// Whether the caller should treat this as "not ready yet" rather than
    /// a failure.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::AbsentIdentity)
    }
}
