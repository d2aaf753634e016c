//! Command channel into the synchronizer task.

use tokio::sync::{mpsc, oneshot};

use agrimarket_shared::{Message, UserId};

use crate::error::SyncError;

/// Commands sent *into* the synchronizer task.
#[derive(Debug)]
pub enum SyncCommand {
    /// Open the conversation with a counterpart and fetch its history.
    Select(UserId),
    /// Close the open conversation.
    ClearSelection,
    /// Send a message to the selected counterpart.
    Send {
        content: String,
        reply: oneshot::Sender<Result<Message, SyncError>>,
    },
    /// Re-fetch the selected conversation.
    Refresh,
    /// Flag the selected conversation's incoming messages as read.
    MarkRead,
    /// Request a copy of the current state.
    Snapshot(oneshot::Sender<SyncSnapshot>),
    /// Release the change-feed subscription and stop the task.
    Shutdown,
}

/// Point-in-time copy of the synchronizer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub identity: Option<UserId>,
    pub selected: Option<UserId>,
    pub messages: Vec<Message>,
    pub subscribed: bool,
}

/// Cloneable handle to a running synchronizer.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    pub(crate) fn new(tx: mpsc::Sender<SyncCommand>) -> Self {
        Self { tx }
    }

    pub async fn select(&self, counterpart: UserId) -> Result<(), SyncError> {
        self.command(SyncCommand::Select(counterpart)).await
    }

    pub async fn clear_selection(&self) -> Result<(), SyncError> {
        self.command(SyncCommand::ClearSelection).await
    }

    /// Send `content` to the selected counterpart and wait for the store.
    ///
    /// [`SyncError::AbsentIdentity`] means the session is not ready yet; the
    /// caller keeps the draft and may retry once signed in.
    pub async fn send(&self, content: impl Into<String>) -> Result<Message, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.command(SyncCommand::Send {
            content: content.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.command(SyncCommand::Refresh).await
    }

    pub async fn mark_read(&self) -> Result<(), SyncError> {
        self.command(SyncCommand::MarkRead).await
    }

    pub async fn snapshot(&self) -> Result<SyncSnapshot, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.command(SyncCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.command(SyncCommand::Shutdown).await
    }

    async fn command(&self, cmd: SyncCommand) -> Result<(), SyncError> {
        self.tx.send(cmd).await.map_err(|_| SyncError::Closed)
    }
}
