//! The synchronizer task.
//!
//! One tokio task owns the [`SyncState`] and multiplexes four sources:
//! application commands, identity transitions, the store's change feed and
//! completions of store calls. Store calls run in their own tasks and report
//! back over an internal channel, so a slow query never blocks commands and
//! results may arrive in any order. The state's fetch tickets sort that out.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use agrimarket_shared::{IdentityWatch, Message, UserId};
use agrimarket_store::{ChangeSubscription, FeedRecv, MessageStore, StoreError};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{Notice, SyncNotification};
use crate::sync::handle::{SyncCommand, SyncHandle, SyncSnapshot};
use crate::sync::state::{FetchOutcome, FetchTicket, PendingSend, SyncState};

/// Store call results routed back into the task.
enum Completion {
    Fetch {
        ticket: FetchTicket,
        result: Result<Vec<Message>, StoreError>,
    },
    Send {
        pending: PendingSend,
        reply: oneshot::Sender<Result<Message, SyncError>>,
        result: Result<Message, StoreError>,
    },
    MarkRead {
        ticket: FetchTicket,
        result: Result<usize, StoreError>,
    },
}

/// Start the synchronizer for `store`, following the session in `identity`.
///
/// Returns the command handle and the notification stream. The task stops
/// on [`SyncHandle::shutdown`] or once every handle is dropped; either way
/// it releases its change-feed subscription.
pub fn spawn_synchronizer<S: MessageStore>(
    store: Arc<S>,
    identity: IdentityWatch,
    config: SyncConfig,
) -> (SyncHandle, mpsc::Receiver<SyncNotification>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<SyncCommand>(config.command_buffer.max(1));
    let (notif_tx, notif_rx) = mpsc::channel::<SyncNotification>(config.notification_buffer.max(1));
    let (done_tx, done_rx) = mpsc::unbounded_channel::<Completion>();

    let synchronizer = Synchronizer {
        state: SyncState::new(config.optimistic_send, config.timestamp_granularity_micros),
        store,
        config,
        subscription: None,
        notif_tx,
        done_tx,
        mark_read_in_flight: false,
    };
    tokio::spawn(synchronizer.run(cmd_rx, identity, done_rx));

    (SyncHandle::new(cmd_tx), notif_rx)
}

struct Synchronizer<S> {
    state: SyncState,
    store: Arc<S>,
    config: SyncConfig,
    subscription: Option<ChangeSubscription>,
    notif_tx: mpsc::Sender<SyncNotification>,
    done_tx: mpsc::UnboundedSender<Completion>,
    mark_read_in_flight: bool,
}

impl<S: MessageStore> Synchronizer<S> {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SyncCommand>,
        mut identity: IdentityWatch,
        mut done_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        if let Some(user) = identity.current() {
            self.on_identity(Some(user));
        }
        let mut identity_open = true;

        loop {
            tokio::select! {
                // --- Application commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SyncCommand::Shutdown) => {
                            info!("Synchronizer shutdown requested");
                            break;
                        }
                        Some(cmd) => self.on_command(cmd),
                        None => {
                            info!("Command channel closed, stopping synchronizer");
                            break;
                        }
                    }
                }

                // --- Session transitions ---
                next = identity.changed(), if identity_open => {
                    match next {
                        Some(user) => self.on_identity(user),
                        None => {
                            debug!("Identity provider dropped");
                            identity_open = false;
                        }
                    }
                }

                // --- Change feed ---
                recv = next_change(&mut self.subscription) => {
                    self.on_change(recv);
                }

                // --- Store call completions ---
                Some(done) = done_rx.recv() => {
                    self.on_completion(done);
                }
            }
        }

        self.unsubscribe();
    }

    fn on_command(&mut self, cmd: SyncCommand) {
        match cmd {
            SyncCommand::Select(counterpart) => {
                if self.state.select(counterpart) {
                    debug!(counterpart = %counterpart.short(), "conversation selected");
                    self.mark_read_in_flight = false;
                    self.notify(SyncNotification::SelectionChanged {
                        counterpart: Some(counterpart),
                    });
                }
                self.start_fetch();
            }
            SyncCommand::ClearSelection => {
                if self.state.clear_selection() {
                    self.mark_read_in_flight = false;
                    self.notify(SyncNotification::SelectionChanged { counterpart: None });
                }
            }
            SyncCommand::Send { content, reply } => self.start_send(&content, reply),
            SyncCommand::Refresh => self.start_fetch(),
            SyncCommand::MarkRead => self.start_mark_read(),
            SyncCommand::Snapshot(reply) => {
                let _ = reply.send(SyncSnapshot {
                    identity: self.state.identity(),
                    selected: self.state.selected(),
                    messages: self.state.messages(),
                    subscribed: self.subscription.is_some(),
                });
            }
            // Handled by the loop.
            SyncCommand::Shutdown => {}
        }
    }

    fn on_identity(&mut self, user: Option<UserId>) {
        if !self.state.set_identity(user) {
            return;
        }
        self.mark_read_in_flight = false;
        self.notify(SyncNotification::IdentityChanged { identity: user });

        match user {
            Some(_) => {
                if self.subscription.is_none() {
                    self.subscription = Some(self.store.subscribe());
                }
                if self.state.selected().is_some() {
                    self.start_fetch();
                }
            }
            None => self.unsubscribe(),
        }
    }

    fn on_change(&mut self, recv: FeedRecv) {
        match recv {
            FeedRecv::Event(event) => {
                if self.state.is_relevant(&event) {
                    debug!(kind = ?event.kind, "relevant change, refetching");
                    self.start_fetch();
                }
            }
            FeedRecv::Lagged(skipped) => {
                warn!(skipped, "change feed lagged, refetching");
                if self.state.selected().is_some() {
                    self.start_fetch();
                }
            }
            FeedRecv::Closed => {
                warn!("change feed closed");
                self.subscription = None;
            }
        }
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Fetch { ticket, result } => match self.state.apply_fetch(ticket, result) {
                FetchOutcome::Applied => {
                    self.notify(SyncNotification::HistoryReplaced {
                        counterpart: ticket.counterpart,
                        messages: self.state.messages(),
                    });
                    if self.config.mark_read_while_open
                        && !self.mark_read_in_flight
                        && self.state.has_unread()
                    {
                        self.start_mark_read();
                    }
                }
                FetchOutcome::Stale => {
                    debug!(counterpart = %ticket.counterpart.short(), "discarding stale fetch");
                }
                FetchOutcome::Failed(e) => {
                    error!(counterpart = %ticket.counterpart.short(), error = %e, "fetch failed");
                    self.notify(SyncNotification::Notice(Notice::fetch_failed(e.to_string())));
                }
            },

            Completion::Send {
                pending,
                reply,
                result,
            } => match result {
                Ok(stored) => {
                    if self.state.confirm_send(pending.temp_id, stored.clone()) {
                        self.view_updated(pending.counterpart);
                    }
                    let _ = reply.send(Ok(stored));
                }
                Err(e) => {
                    error!(recipient = %pending.counterpart.short(), error = %e, "send failed");
                    if self.state.fail_send(pending.temp_id) {
                        self.view_updated(pending.counterpart);
                    }
                    self.notify(SyncNotification::Notice(Notice::send_failed(
                        e.to_string(),
                        pending.draft,
                    )));
                    let _ = reply.send(Err(SyncError::Store(e)));
                }
            },

            Completion::MarkRead { ticket, result } => {
                let counterpart = ticket.counterpart;
                if !self.state.is_current(&ticket) {
                    // A newer mark-read may be in flight; leave its flag alone.
                    debug!(counterpart = %counterpart.short(), ok = result.is_ok(), "discarding stale mark read");
                    return;
                }
                self.mark_read_in_flight = false;
                match result {
                    Ok(count) => debug!(counterpart = %counterpart.short(), count, "marked read"),
                    Err(e) => {
                        error!(counterpart = %counterpart.short(), error = %e, "mark read failed");
                        self.notify(SyncNotification::Notice(Notice::mark_read_failed(
                            e.to_string(),
                        )));
                    }
                }
            }
        }
    }

    fn start_fetch(&self) {
        let ticket = match self.state.begin_fetch() {
            Ok(ticket) => ticket,
            Err(e) => {
                debug!(reason = %e, "fetch deferred");
                return;
            }
        };

        let store = Arc::clone(&self.store);
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = store
                .fetch_conversation(ticket.self_id, ticket.counterpart)
                .await;
            let _ = done.send(Completion::Fetch { ticket, result });
        });
    }

    fn start_send(&mut self, content: &str, reply: oneshot::Sender<Result<Message, SyncError>>) {
        let pending = match self.state.begin_send(content) {
            Ok(pending) => pending,
            Err(e) => {
                if e.is_deferred() {
                    debug!("send deferred until signed in");
                } else {
                    debug!(error = %e, "send rejected");
                }
                let _ = reply.send(Err(e));
                return;
            }
        };

        if self.config.optimistic_send {
            self.view_updated(pending.counterpart);
        }

        let store = Arc::clone(&self.store);
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = store.insert_message(pending.message.clone()).await;
            let _ = done.send(Completion::Send {
                pending,
                reply,
                result,
            });
        });
    }

    fn start_mark_read(&mut self) {
        let ticket = match self.state.begin_fetch() {
            Ok(ticket) => ticket,
            Err(e) => {
                debug!(reason = %e, "mark read deferred");
                return;
            }
        };
        self.mark_read_in_flight = true;

        let store = Arc::clone(&self.store);
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = store.mark_read(ticket.self_id, ticket.counterpart).await;
            let _ = done.send(Completion::MarkRead { ticket, result });
        });
    }

    fn view_updated(&self, counterpart: UserId) {
        if self.state.selected() != Some(counterpart) {
            return;
        }
        self.notify(SyncNotification::ViewUpdated {
            counterpart,
            messages: self.state.messages(),
        });
    }

    fn unsubscribe(&mut self) {
        if self.subscription.take().is_some() {
            debug!("change feed subscription released");
        }
    }

    fn notify(&self, notification: SyncNotification) {
        match self.notif_tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(notification = ?dropped, "notification buffer full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Next feed event, or never when there is no subscription.
async fn next_change(subscription: &mut Option<ChangeSubscription>) -> FeedRecv {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}
