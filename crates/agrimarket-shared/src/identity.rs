//! Identity provider adapter.
//!
//! The authenticated session is owned by an external auth service. The core
//! only ever sees the current user id, which may be absent (not signed in,
//! or the initial session has not been resolved yet), and is told about
//! every transition through a [`tokio::sync::watch`] channel.

use tokio::sync::watch;
use tracing::info;

use crate::types::UserId;

/// Publishes the current session's user id.
///
/// Starts with no identity. The auth integration calls [`sign_in`] once the
/// session resolves and [`sign_out`] when it ends.
///
/// [`sign_in`]: IdentityProvider::sign_in
/// [`sign_out`]: IdentityProvider::sign_out
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    tx: watch::Sender<Option<UserId>>,
}

impl IdentityProvider {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish a resolved session. Re-publishing the same user is a no-op
    /// for watchers.
    pub fn sign_in(&self, user: UserId) {
        if self.replace(Some(user)) {
            info!(user = %user.short(), "identity signed in");
        }
    }

    pub fn sign_out(&self) {
        if self.replace(None) {
            info!("identity signed out");
        }
    }

    pub fn current(&self) -> Option<UserId> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> IdentityWatch {
        IdentityWatch {
            rx: self.tx.subscribe(),
        }
    }

    fn replace(&self, next: Option<UserId>) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the identity provider.
#[derive(Debug, Clone)]
pub struct IdentityWatch {
    rx: watch::Receiver<Option<UserId>>,
}

impl IdentityWatch {
    pub fn current(&self) -> Option<UserId> {
        *self.rx.borrow()
    }

    /// Wait for the next identity transition.
    ///
    /// Returns `None` once the provider has been dropped; the caller should
    /// stop watching at that point.
    pub async fn changed(&mut self) -> Option<Option<UserId>> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
