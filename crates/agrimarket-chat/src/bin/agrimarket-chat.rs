//! # agrimarket-chat
//!
//! Terminal client for one marketplace conversation.
//!
//! Reads its settings from the environment (see [`ClientConfig`]), signs in
//! the configured user, opens the conversation with the configured
//! counterpart and then sends every stdin line as a message. Lines starting
//! with `/` are commands:
//!
//! - `/read`: mark the open conversation as read
//! - `/refresh`: re-fetch the open conversation
//! - `/list`: show the conversation list
//! - `/search <term>`: filter the list by participant name
//! - `/open <n>`: open the n-th conversation of the last listing
//! - `/quit`: exit
//!
//! With `--json` every synchronizer notification is printed as one JSON
//! object per line instead of the human-readable rendering.

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use agrimarket_chat::logging::init_tracing;
use agrimarket_chat::{
    spawn_synchronizer, ClientConfig, ConversationIndex, ExternalContext, Notice, NoticeLevel,
    ProductRef, SyncError, SyncHandle, SyncNotification,
};
use agrimarket_shared::{AppRole, IdentityProvider, Message, UserId};
use agrimarket_shared::constants::APP_NAME;
use agrimarket_store::{Database, MessageStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    init_tracing();
    info!("Starting {APP_NAME} chat v{}", env!("CARGO_PKG_VERSION"));

    let json = std::env::args().skip(1).any(|arg| arg == "--json");
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let Some(me) = config.user_id else {
        bail!("AGRIMARKET_USER_ID must be set to the signed-in user's id");
    };

    // -----------------------------------------------------------------------
    // 2. Store, identity and synchronizer
    // -----------------------------------------------------------------------
    let store = Arc::new(match &config.db_path {
        Some(path) => SqliteStore::open_at(path, &config.store)
            .with_context(|| format!("opening {}", path.display()))?,
        None => SqliteStore::new(
            Database::new(&config.store).context("opening default database")?,
            &config.store,
        ),
    });

    let identity = IdentityProvider::new();
    let (handle, mut notifications) =
        spawn_synchronizer(Arc::clone(&store), identity.subscribe(), config.sync.clone());
    identity.sign_in(me);

    // -----------------------------------------------------------------------
    // 3. Conversation list
    // -----------------------------------------------------------------------
    let mut index = ConversationIndex::new();
    for summary in store.conversation_summaries(me).await? {
        let profile = store.profile(summary.counterpart_id).await?;
        index.upsert_summary(&summary, profile.as_ref());
    }

    if let Some(peer) = config.peer_id {
        match &config.product {
            Some((id, name)) => {
                let profile = store.profile(peer).await?;
                let context = ExternalContext {
                    counterpart_id: peer,
                    counterpart_name: profile
                        .as_ref()
                        .map(|p| p.full_name.clone())
                        .unwrap_or_else(|| peer.short()),
                    counterpart_role: profile.as_ref().map_or(AppRole::Farmer, |p| p.user_type),
                    product: ProductRef {
                        id: id.clone(),
                        name: name.clone(),
                    },
                    phone: profile.as_ref().and_then(|p| p.phone_number.clone()),
                    avatar: profile.as_ref().and_then(|p| p.avatar_url.clone()),
                };
                let conversation = index.upsert_from_external_context(&context);
                print_notice(&Notice::chat_started(&conversation.participant_name));
                println!("Suggested: {}", context.opening_draft());
            }
            None => {
                if !index.select(peer) {
                    warn!(peer = %peer.short(), "no conversation with peer yet");
                }
            }
        }
        handle.select(peer).await?;
    }

    // -----------------------------------------------------------------------
    // 4. Event loop: stdin lines and synchronizer notifications
    // -----------------------------------------------------------------------
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut listing: Vec<UserId> = Vec::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim_end_matches('\r');
                match line.split_once(' ').unwrap_or((line, "")) {
                    ("/quit", _) => break,
                    ("/refresh", _) => handle.refresh().await?,
                    ("/read", _) => handle.mark_read().await?,
                    ("/list", _) => listing = print_list(&index, ""),
                    ("/search", term) => listing = print_list(&index, term.trim()),
                    ("/open", n) => {
                        match n.trim().parse::<usize>().ok().and_then(|n| listing.get(n.checked_sub(1)?)) {
                            Some(&counterpart) => {
                                index.select(counterpart);
                                handle.select(counterpart).await?;
                            }
                            None => eprintln!("usage: /open <n> (see /list)"),
                        }
                    }
                    _ if line.trim().is_empty() => {}
                    _ => send(&handle, line).await,
                }
            }

            Some(notification) = notifications.recv() => {
                if json {
                    println!("{}", serde_json::to_string(&notification)?);
                } else {
                    render(&mut index, me, &notification);
                }
            }
        }
    }

    info!("Shutting down");
    handle.shutdown().await?;
    Ok(())
}

async fn send(handle: &SyncHandle, content: &str) {
    match handle.send(content).await {
        Ok(stored) => info!(msg_id = %stored.id, "sent"),
        // Store failures arrive as a notice carrying the draft.
        Err(SyncError::Store(_)) => {}
        Err(e) => eprintln!("not sent: {e}"),
    }
}

fn render(index: &mut ConversationIndex, me: UserId, notification: &SyncNotification) {
    match notification {
        SyncNotification::HistoryReplaced {
            counterpart,
            messages,
        } => {
            index.apply_history(*counterpart, me, messages);
            println!("---");
            for message in messages {
                print_message(index, me, message);
            }
        }
        SyncNotification::ViewUpdated { messages, .. } => {
            if let Some(last) = messages.last() {
                print_message(index, me, last);
            }
        }
        SyncNotification::SelectionChanged {
            counterpart: Some(counterpart),
        } => {
            let name = index
                .get(*counterpart)
                .map(|c| c.participant_name.clone())
                .unwrap_or_else(|| counterpart.short());
            println!("== {name} ==");
            if let Some(phone) = index.contact(*counterpart) {
                println!("   call: {phone}");
            }
        }
        SyncNotification::SelectionChanged { counterpart: None } => {}
        SyncNotification::IdentityChanged { identity } => match identity {
            Some(user) => info!(user = %user.short(), "signed in"),
            None => println!("(signed out)"),
        },
        SyncNotification::Notice(notice) => print_notice(notice),
    }
}

fn print_message(index: &ConversationIndex, me: UserId, message: &Message) {
    let marker = if message.sender_id == me || message.is_read {
        " "
    } else {
        "*"
    };
    println!(
        "{marker}[{}] {}: {}",
        message.created_at.format("%H:%M"),
        index.sender_label(message.sender_id, me),
        message.content
    );
}

fn print_notice(notice: &Notice) {
    match notice.level {
        NoticeLevel::Info => println!("{}: {}", notice.title, notice.description),
        NoticeLevel::Error => eprintln!("{}: {}", notice.title, notice.description),
    }
    if let Some(draft) = &notice.draft {
        eprintln!("draft kept: {draft}");
    }
}

fn print_list(index: &ConversationIndex, term: &str) -> Vec<UserId> {
    let hits = index.filter(term);
    for (n, conversation) in hits.iter().enumerate() {
        let role = conversation
            .participant_role
            .map(|r| r.as_str())
            .unwrap_or("");
        let unread = match conversation.unread_count {
            0 => String::new(),
            count => format!(" ({count} unread)"),
        };
        println!(
            "{:>2}. {} {}{}: {}",
            n + 1,
            conversation.participant_name,
            role,
            unread,
            conversation.last_message
        );
    }
    hits.iter().map(|c| c.id).collect()
}
