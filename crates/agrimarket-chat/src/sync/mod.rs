//! Conversation synchronization: a pure state machine and the task that
//! drives it against a [`MessageStore`](agrimarket_store::MessageStore).

pub mod actor;
pub mod handle;
pub mod state;

pub use actor::spawn_synchronizer;
pub use handle::{SyncCommand, SyncHandle, SyncSnapshot};
pub use state::{FetchOutcome, FetchTicket, PendingSend, SyncState};
