//! Drives the synchronizer task against real and instrumented stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Semaphore};

use agrimarket_chat::{spawn_synchronizer, SyncConfig, SyncError, SyncNotification};
use agrimarket_shared::{IdentityProvider, Message, MessageId, NewMessage, UserId};
use agrimarket_store::{
    ChangeEvent, ChangeFeed, ChangeSubscription, ConversationSummary, MessageStore, Profile,
    Result, SqliteStore, StoreConfig, StoreError,
};

const WAIT: Duration = Duration::from_secs(5);

fn sqlite() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory(&StoreConfig::default()).unwrap())
}

fn new_message(from: UserId, to: UserId, content: &str) -> NewMessage {
    NewMessage {
        sender_id: from,
        recipient_id: to,
        content: content.into(),
    }
}

fn row(from: UserId, to: UserId, content: &str) -> Message {
    Message {
        id: MessageId::new(),
        sender_id: from,
        recipient_id: to,
        content: content.into(),
        created_at: Utc::now(),
        is_read: false,
    }
}

/// Wait for the first notification matching `pred`, skipping the rest.
async fn wait_for<F>(rx: &mut mpsc::Receiver<SyncNotification>, mut pred: F) -> SyncNotification
where
    F: FnMut(&SyncNotification) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let notification = rx.recv().await.expect("synchronizer stopped");
            if pred(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("timed out waiting for notification")
}

/// Wait for a history replacement for `counterpart` and return its list.
async fn history_for(rx: &mut mpsc::Receiver<SyncNotification>, counterpart: UserId) -> Vec<Message> {
    match wait_for(rx, |n| {
        matches!(n, SyncNotification::HistoryReplaced { counterpart: c, .. } if *c == counterpart)
    })
    .await
    {
        SyncNotification::HistoryReplaced { messages, .. } => messages,
        _ => unreachable!(),
    }
}

fn no_auto_read() -> SyncConfig {
    SyncConfig {
        mark_read_while_open: false,
        ..SyncConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Instrumented stores
// ---------------------------------------------------------------------------

/// Counts calls before delegating to SQLite.
struct CountingStore {
    inner: Arc<SqliteStore>,
    fetches: AtomicUsize,
    inserts: AtomicUsize,
}

impl CountingStore {
    fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MessageStore for CountingStore {
    async fn fetch_conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_conversation(a, b).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_message(message).await
    }

    async fn mark_read(&self, me: UserId, counterpart: UserId) -> Result<usize> {
        self.inner.mark_read(me, counterpart).await
    }

    async fn conversation_summaries(&self, me: UserId) -> Result<Vec<ConversationSummary>> {
        self.inner.conversation_summaries(me).await
    }

    async fn profile(&self, user: UserId) -> Result<Option<Profile>> {
        self.inner.profile(user).await
    }

    fn subscribe(&self) -> ChangeSubscription {
        self.inner.subscribe()
    }
}

/// Fetches block until the test releases the gate registered for the
/// counterpart; inserts always fail.
struct GatedStore {
    gates: Mutex<HashMap<UserId, oneshot::Receiver<Vec<Message>>>>,
    feed: ChangeFeed,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            feed: ChangeFeed::new("public:messages", 16),
        }
    }

    fn gate(&self, counterpart: UserId) -> oneshot::Sender<Vec<Message>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(counterpart, rx);
        tx
    }
}

#[async_trait]
impl MessageStore for GatedStore {
    async fn fetch_conversation(&self, _a: UserId, b: UserId) -> Result<Vec<Message>> {
        let gate = self.gates.lock().unwrap().remove(&b);
        match gate {
            Some(rx) => rx
                .await
                .map_err(|_| StoreError::Unavailable("gate dropped".into())),
            None => Ok(Vec::new()),
        }
    }

    async fn insert_message(&self, _message: NewMessage) -> Result<Message> {
        Err(StoreError::Unavailable("offline".into()))
    }

    async fn mark_read(&self, _me: UserId, _counterpart: UserId) -> Result<usize> {
        Ok(0)
    }

    async fn conversation_summaries(&self, _me: UserId) -> Result<Vec<ConversationSummary>> {
        Ok(Vec::new())
    }

    async fn profile(&self, _user: UserId) -> Result<Option<Profile>> {
        Ok(None)
    }

    fn subscribe(&self) -> ChangeSubscription {
        self.feed.subscribe()
    }
}

/// Every fetch shows one unread incoming message; mark-read calls block
/// until the test adds a permit.
struct ReadGateStore {
    mark_reads: AtomicUsize,
    permits: Semaphore,
    feed: ChangeFeed,
}

impl ReadGateStore {
    fn new() -> Self {
        Self {
            mark_reads: AtomicUsize::new(0),
            permits: Semaphore::new(0),
            feed: ChangeFeed::new("public:messages", 16),
        }
    }
}

#[async_trait]
impl MessageStore for ReadGateStore {
    async fn fetch_conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        Ok(vec![row(b, a, "still unread")])
    }

    async fn insert_message(&self, _message: NewMessage) -> Result<Message> {
        Err(StoreError::Unavailable("read only".into()))
    }

    async fn mark_read(&self, _me: UserId, _counterpart: UserId) -> Result<usize> {
        self.mark_reads.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        permit.forget();
        Ok(0)
    }

    async fn conversation_summaries(&self, _me: UserId) -> Result<Vec<ConversationSummary>> {
        Ok(Vec::new())
    }

    async fn profile(&self, _user: UserId) -> Result<Option<Profile>> {
        Ok(None)
    }

    fn subscribe(&self) -> ChangeSubscription {
        self.feed.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_then_fetch_includes_sent_message() {
    let store = sqlite();
    let (me, farmer) = (UserId::new(), UserId::new());
    let identity = IdentityProvider::new();
    identity.sign_in(me);

    let (handle, mut rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), no_auto_read());
    handle.select(farmer).await.unwrap();
    assert!(history_for(&mut rx, farmer).await.is_empty());

    let stored = handle.send("  Is the rice still available? ").await.unwrap();
    assert_eq!(stored.content, "Is the rice still available?");
    assert!(!stored.is_read);

    // The insert's change event triggers a refetch that contains the row.
    let history = history_for(&mut rx, farmer).await;
    assert_eq!(history, vec![stored.clone()]);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages, vec![stored.clone()]);
    assert_eq!(store.fetch_conversation(farmer, me).await.unwrap(), vec![stored]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn whitespace_send_never_reaches_store() {
    let store = Arc::new(CountingStore::new(sqlite()));
    let (me, farmer) = (UserId::new(), UserId::new());
    let identity = IdentityProvider::new();
    identity.sign_in(me);

    let (handle, _rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), no_auto_read());
    handle.select(farmer).await.unwrap();

    let err = handle.send(" \n\t ").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(store.inserts.load(Ordering::SeqCst), 0);
    assert!(handle.snapshot().await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn unrelated_changes_do_not_refetch() {
    let inner = sqlite();
    let store = Arc::new(CountingStore::new(Arc::clone(&inner)));
    let (me, farmer) = (UserId::new(), UserId::new());
    let (x, y) = (UserId::new(), UserId::new());
    let identity = IdentityProvider::new();
    identity.sign_in(me);

    let (handle, mut rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), no_auto_read());
    handle.select(farmer).await.unwrap();
    history_for(&mut rx, farmer).await;
    assert_eq!(store.fetches.load(Ordering::SeqCst), 1);

    inner.insert_message(new_message(x, y, "not ours")).await.unwrap();
    let incoming = inner
        .insert_message(new_message(farmer, me, "200 per kg"))
        .await
        .unwrap();

    assert_eq!(history_for(&mut rx, farmer).await, vec![incoming]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
}

async fn switch_conversation(release_previous_first: bool) {
    let store = Arc::new(GatedStore::new());
    let (me, b, c) = (UserId::new(), UserId::new(), UserId::new());
    let identity = IdentityProvider::new();
    identity.sign_in(me);

    let gate_b = store.gate(b);
    let gate_c = store.gate(c);
    let (handle, mut rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), no_auto_read());

    handle.select(b).await.unwrap();
    handle.select(c).await.unwrap();

    let b_history = vec![row(b, me, "from b")];
    let c_history = vec![row(c, me, "from c")];

    if release_previous_first {
        gate_b.send(b_history).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate_c.send(c_history.clone()).unwrap();
    } else {
        gate_c.send(c_history.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate_b.send(b_history).unwrap();
    }

    assert_eq!(history_for(&mut rx, c).await, c_history);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // B's result never surfaced and the view still shows C.
    while let Ok(notification) = rx.try_recv() {
        assert!(!matches!(
            notification,
            SyncNotification::HistoryReplaced { counterpart, .. } if counterpart == b
        ));
    }
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.selected, Some(c));
    assert_eq!(snapshot.messages, c_history);
}

#[tokio::test]
async fn latest_selection_wins_when_it_completes_first() {
    switch_conversation(false).await;
}

#[tokio::test]
async fn latest_selection_wins_when_it_completes_last() {
    switch_conversation(true).await;
}

#[tokio::test]
async fn failed_send_keeps_draft_and_drops_pending() {
    let store = Arc::new(GatedStore::new());
    let (me, farmer) = (UserId::new(), UserId::new());
    let identity = IdentityProvider::new();
    identity.sign_in(me);

    let (handle, mut rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), no_auto_read());
    handle.select(farmer).await.unwrap();
    history_for(&mut rx, farmer).await;

    let err = handle.send("hello").await.unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Unavailable(_))));

    let notice = wait_for(&mut rx, |n| matches!(n, SyncNotification::Notice(_))).await;
    match notice {
        SyncNotification::Notice(notice) => assert_eq!(notice.draft.as_deref(), Some("hello")),
        _ => unreachable!(),
    }
    assert!(handle.snapshot().await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn absent_identity_defers_until_sign_in() {
    let store = sqlite();
    let (me, farmer) = (UserId::new(), UserId::new());
    let earlier = store
        .insert_message(new_message(farmer, me, "fresh carrots today"))
        .await
        .unwrap();

    let identity = IdentityProvider::new();
    let (handle, mut rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), no_auto_read());
    handle.select(farmer).await.unwrap();

    let err = handle.send("hi").await.unwrap_err();
    assert!(err.is_deferred());
    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.subscribed);

    identity.sign_in(me);
    assert_eq!(history_for(&mut rx, farmer).await, vec![earlier]);
    assert!(handle.snapshot().await.unwrap().subscribed);

    identity.sign_out();
    wait_for(&mut rx, |n| {
        matches!(n, SyncNotification::IdentityChanged { identity: None })
    })
    .await;
    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.subscribed);
}

#[tokio::test]
async fn open_conversation_marks_incoming_read() {
    let store = sqlite();
    let (me, buyer) = (UserId::new(), UserId::new());
    store
        .insert_message(new_message(buyer, me, "is the order ready?"))
        .await
        .unwrap();

    let identity = IdentityProvider::new();
    identity.sign_in(me);
    let (handle, mut rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), SyncConfig::default());
    handle.select(buyer).await.unwrap();

    wait_for(&mut rx, |n| match n {
        SyncNotification::HistoryReplaced { messages, .. } => {
            messages.len() == 1 && messages[0].is_read
        }
        _ => false,
    })
    .await;

    let stored = store.fetch_conversation(me, buyer).await.unwrap();
    assert!(stored[0].is_read);
}

#[tokio::test]
async fn shutdown_releases_subscription() {
    let store = sqlite();
    let identity = IdentityProvider::new();
    identity.sign_in(UserId::new());

    let (handle, _rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), SyncConfig::default());
    assert!(handle.snapshot().await.unwrap().subscribed);
    assert_eq!(store.feed().subscriber_count(), 1);

    handle.shutdown().await.unwrap();
    tokio::time::timeout(WAIT, async {
        while store.feed().subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription not released");

    assert!(matches!(handle.snapshot().await, Err(SyncError::Closed)));
}

#[tokio::test]
async fn sent_messages_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("market.db");
    let config = StoreConfig::default();
    let (me, farmer) = (UserId::new(), UserId::new());

    let sent = {
        let store = Arc::new(SqliteStore::open_at(&path, &config).unwrap());
        let identity = IdentityProvider::new();
        identity.sign_in(me);
        let (handle, _rx) = spawn_synchronizer(store, identity.subscribe(), no_auto_read());
        handle.select(farmer).await.unwrap();
        let sent = handle.send("see you at the market").await.unwrap();
        handle.shutdown().await.unwrap();
        sent
    };

    let reopened = SqliteStore::open_at(&path, &config).unwrap();
    assert_eq!(reopened.fetch_conversation(me, farmer).await.unwrap(), vec![sent]);
}

#[tokio::test]
async fn feed_lag_triggers_refetch() {
    let config = StoreConfig {
        feed_capacity: 1,
        ..StoreConfig::default()
    };
    let inner = Arc::new(SqliteStore::open_in_memory(&config).unwrap());
    let store = Arc::new(CountingStore::new(Arc::clone(&inner)));
    let (me, farmer) = (UserId::new(), UserId::new());
    let (x, y) = (UserId::new(), UserId::new());
    let identity = IdentityProvider::new();
    identity.sign_in(me);

    let (handle, mut rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), no_auto_read());
    handle.select(farmer).await.unwrap();
    history_for(&mut rx, farmer).await;
    assert_eq!(store.fetches.load(Ordering::SeqCst), 1);

    // Unrelated on their own, but more than the subscriber can buffer.
    for _ in 0..4 {
        inner.feed().publish(ChangeEvent::insert(row(x, y, "not ours")));
    }

    history_for(&mut rx, farmer).await;
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cleared_selection_empties_view_and_ignores_changes() {
    let inner = sqlite();
    let store = Arc::new(CountingStore::new(Arc::clone(&inner)));
    let (me, farmer) = (UserId::new(), UserId::new());
    inner
        .insert_message(new_message(farmer, me, "carrots are in"))
        .await
        .unwrap();
    let identity = IdentityProvider::new();
    identity.sign_in(me);

    let (handle, mut rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), no_auto_read());
    handle.select(farmer).await.unwrap();
    assert_eq!(history_for(&mut rx, farmer).await.len(), 1);

    handle.clear_selection().await.unwrap();
    wait_for(&mut rx, |n| {
        matches!(n, SyncNotification::SelectionChanged { counterpart: None })
    })
    .await;
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.selected, None);
    assert!(snapshot.messages.is_empty());

    inner
        .insert_message(new_message(farmer, me, "anyone there?"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    assert!(handle.snapshot().await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn stale_mark_read_does_not_unblock_a_second_one() {
    let store = Arc::new(ReadGateStore::new());
    let (first, second, farmer) = (UserId::new(), UserId::new(), UserId::new());
    let identity = IdentityProvider::new();
    identity.sign_in(first);

    let (handle, mut rx) = spawn_synchronizer(Arc::clone(&store), identity.subscribe(), SyncConfig::default());
    handle.select(farmer).await.unwrap();
    history_for(&mut rx, farmer).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.mark_reads.load(Ordering::SeqCst), 1);

    // Switch user while the first mark-read is still blocked.
    identity.sign_in(second);
    history_for(&mut rx, farmer).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.mark_reads.load(Ordering::SeqCst), 2);

    // Semaphore waiters are served in order: this releases the first user's call.
    store.permits.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.refresh().await.unwrap();
    history_for(&mut rx, farmer).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.mark_reads.load(Ordering::SeqCst), 2);

    store.permits.add_permits(1);
}
