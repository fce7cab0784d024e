#![allow(dead_code)]

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use parley_core::Subscription;
use parley_db::Database;
use parley_types::{
    Backend, BackendError, ChangeFilter, ChangeStream, Conversation, ConversationId, Message, TypingIndicator,
    User, UserId,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub struct Fixture {
    pub db: Database,
    pub alice: User,
    pub bob: User,
    pub carol: User,
}

pub fn fixture() -> Fixture {
    init_tracing();
    let db = Database::open_in_memory().unwrap();
    let alice = db.create_user("alice", "alice@example.com", "").unwrap();
    let bob = db.create_user("bob", "bob@example.com", "").unwrap();
    let carol = db.create_user("carol", "", "555-0199").unwrap();
    Fixture { db, alice, bob, carol }
}

pub async fn next_within<T>(sub: &mut Subscription<T>) -> T {
    tokio::time::timeout(WAIT, sub.next())
        .await
        .expect("timed out waiting for event")
        .expect("subscription ended")
}

pub async fn assert_silent<T: Debug>(sub: &mut Subscription<T>, quiet: Duration) {
    if let Ok(event) = tokio::time::timeout(quiet, sub.next()).await {
        panic!("expected no event, got {:?}", event);
    }
}

/// Poll `check` until it holds or `WAIT` elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Knobs shared by every clone of a [`TestBackend`].
#[derive(Default)]
pub struct Knobs {
    /// Store calls made so far (subscribe excluded).
    pub calls: AtomicUsize,
    /// Fail this many upcoming store calls with `Unavailable`.
    pub fail_calls: AtomicUsize,
    /// Report no participations for this many upcoming lookups.
    pub stale_reads: AtomicUsize,
    /// Hand out this many already-closed change streams.
    pub closed_feeds: AtomicUsize,
    pub subscribes: AtomicUsize,
    /// Participation lookups for this user are delayed.
    pub slow_user: std::sync::Mutex<Option<(UserId, Duration)>>,
    /// History reads for this conversation are delayed.
    pub slow_history: std::sync::Mutex<Option<(ConversationId, Duration)>>,
}

/// SQLite backend with fault injection.
#[derive(Clone)]
pub struct TestBackend {
    pub db: Database,
    pub knobs: Arc<Knobs>,
}

impl TestBackend {
    pub fn new(db: Database) -> Self {
        Self { db, knobs: Arc::new(Knobs::default()) }
    }

    pub fn calls(&self) -> usize {
        self.knobs.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), BackendError> {
        self.knobs.calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.knobs.fail_calls) {
            return Err(BackendError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Backend for TestBackend {
    async fn participant_conversations(&self, user_id: UserId) -> Result<Vec<ConversationId>, BackendError> {
        self.enter()?;
        let delay = *self.knobs.slow_user.lock().unwrap();
        if let Some((slow, by)) = delay {
            if slow == user_id {
                tokio::time::sleep(by).await;
            }
        }
        if take_one(&self.knobs.stale_reads) {
            return Ok(vec![]);
        }
        Backend::participant_conversations(&self.db, user_id).await
    }

    async fn conversation_by_pair_key(&self, pair_key: &str) -> Result<Option<Conversation>, BackendError> {
        self.enter()?;
        Backend::conversation_by_pair_key(&self.db, pair_key).await
    }

    async fn create_conversation(
        &self,
        pair_key: &str,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Conversation, BackendError> {
        self.enter()?;
        Backend::create_conversation(&self.db, pair_key, user_a, user_b).await
    }

    async fn is_participant(&self, conversation_id: ConversationId, user_id: UserId) -> Result<bool, BackendError> {
        self.enter()?;
        Backend::is_participant(&self.db, conversation_id, user_id).await
    }

    async fn insert_message(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        content: &str,
    ) -> Result<Message, BackendError> {
        self.enter()?;
        Backend::insert_message(&self.db, conversation_id, user_id, content).await
    }

    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, BackendError> {
        self.enter()?;
        let delay = *self.knobs.slow_history.lock().unwrap();
        if let Some((slow, by)) = delay {
            if slow == conversation_id {
                tokio::time::sleep(by).await;
            }
        }
        Backend::messages(&self.db, conversation_id).await
    }

    async fn upsert_typing(&self, indicator: TypingIndicator) -> Result<TypingIndicator, BackendError> {
        self.enter()?;
        Backend::upsert_typing(&self.db, indicator).await
    }

    async fn typing_indicators(&self, conversation_id: ConversationId) -> Result<Vec<TypingIndicator>, BackendError> {
        self.enter()?;
        Backend::typing_indicators(&self.db, conversation_id).await
    }

    async fn delete_typing_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<TypingIndicator>, BackendError> {
        self.enter()?;
        Backend::delete_typing_before(&self.db, cutoff).await
    }

    fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream, BackendError> {
        self.knobs.subscribes.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.knobs.closed_feeds) {
            let (tx, rx) = broadcast::channel(1);
            drop(tx);
            return Ok(ChangeStream::new(rx, filter));
        }
        Backend::subscribe(&self.db, filter)
    }
}
