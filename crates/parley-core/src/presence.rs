use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_types::{
    Backend, ChangeEvent, ChangeFilter, ConversationId, Row, RowChange, StreamError, Table, TypingIndicator,
    UserId,
};

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::error::Result;
use crate::retry::Backoff;
use crate::subscription::Subscription;

/// A peer's typing state as seen by a subscriber. Deleted rows arrive as
/// `is_typing = false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub user_id: UserId,
    pub is_typing: bool,
    pub last_updated: DateTime<Utc>,
}

impl PresenceEvent {
    fn from_change(change: &RowChange) -> Option<Self> {
        match (change.event, &change.new, &change.old) {
            (ChangeEvent::Delete, _, Some(Row::Typing(old))) => Some(Self {
                user_id: old.user_id,
                is_typing: false,
                last_updated: old.last_updated,
            }),
            (ChangeEvent::Insert | ChangeEvent::Update, Some(Row::Typing(new)), _) => Some(new.into()),
            _ => None,
        }
    }
}

impl From<&TypingIndicator> for PresenceEvent {
    fn from(row: &TypingIndicator) -> Self {
        Self {
            user_id: row.user_id,
            is_typing: row.is_typing,
            last_updated: row.last_updated,
        }
    }
}

/// Per-conversation, per-user typing flags. The tracker writes and
/// streams rows; debounce is the caller's job.
#[derive(Clone)]
pub struct PresenceTracker<B> {
    backend: B,
    config: CoreConfig,
    clock: Clock,
}

impl<B: Backend> PresenceTracker<B> {
    pub fn new(backend: B, config: CoreConfig, clock: Clock) -> Self {
        Self { backend, config, clock }
    }

    /// Upsert the caller's indicator, stamping it with the current time.
    pub async fn set_typing(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    ) -> Result<TypingIndicator> {
        let row = TypingIndicator::new(conversation_id, user_id, is_typing, self.clock.now());
        Ok(self.backend.upsert_typing(row).await?)
    }

    /// Whether a row still counts as typing at `now`.
    pub fn is_active(&self, row: &TypingIndicator, now: DateTime<Utc>) -> bool {
        row.is_typing && !is_stale(row.last_updated, now, self.config.typing_window)
    }

    /// Users currently typing in a conversation, stale rows excluded.
    pub async fn active_typists(&self, conversation_id: ConversationId) -> Result<Vec<TypingIndicator>> {
        let now = self.clock.now();
        let rows = self.backend.typing_indicators(conversation_id).await?;
        Ok(rows.into_iter().filter(|row| self.is_active(row, now)).collect())
    }

    /// Stream typing changes of everyone but `local_user`. Each (re)attach
    /// starts with a snapshot of the current rows.
    pub fn subscribe(&self, conversation_id: ConversationId, local_user: UserId) -> Subscription<PresenceEvent> {
        let (tx, rx) = mpsc::channel(self.config.subscription_buffer.max(1));
        let backoff = Backoff::new(self.config.retry_base, self.config.retry_max);
        let pump = tokio::spawn(pump_presence(self.backend.clone(), conversation_id, local_user, tx, backoff));
        Subscription::new(conversation_id, rx, pump)
    }

    /// Delete rows untouched for longer than `stale_typing`. Subscribers
    /// see the deletes as stop-typing events.
    pub async fn sweep_stale(&self) -> Result<usize> {
        let age = chrono::Duration::from_std(self.config.stale_typing).unwrap_or_else(|_| chrono::Duration::zero());
        let removed = self.backend.delete_typing_before(self.clock.now() - age).await?;
        Ok(removed.len())
    }

    /// Background task that sweeps stale indicators on an interval.
    pub async fn run_sweeper(self, interval: Duration) {
        let mut interval = tokio::time::interval(interval);

        loop {
            interval.tick().await;

            match self.sweep_stale().await {
                Ok(count) => {
                    if count > 0 {
                        info!("Sweeper: removed {} stale typing indicators", count);
                    }
                }
                Err(e) => {
                    warn!("Sweeper error: {}", e);
                }
            }
        }
    }
}

fn is_stale(last_updated: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match (now - last_updated).to_std() {
        Ok(age) => age >= window,
        // Stamped in the future (clock skew): not stale.
        Err(_) => false,
    }
}

async fn pump_presence<B: Backend>(
    backend: B,
    conversation_id: ConversationId,
    local_user: UserId,
    tx: mpsc::Sender<PresenceEvent>,
    mut backoff: Backoff,
) {
    let filter = ChangeFilter::table(Table::TypingIndicators).eq("conversation_id", conversation_id);

    loop {
        let mut stream = match backend.subscribe(filter.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Typing feed for {} unavailable: {}", conversation_id, e);
                backoff.wait().await;
                continue;
            }
        };

        match backend.typing_indicators(conversation_id).await {
            Ok(rows) => {
                for row in rows.iter().filter(|row| row.user_id != local_user) {
                    if tx.send(row.into()).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Typing snapshot for {} failed: {}", conversation_id, e);
                backoff.wait().await;
                continue;
            }
        }

        loop {
            match stream.recv().await {
                Ok(change) => {
                    backoff.reset();
                    let Some(event) = PresenceEvent::from_change(&change) else {
                        continue;
                    };
                    if event.user_id == local_user {
                        continue;
                    }
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Err(StreamError::Lagged(n)) => {
                    debug!("Typing feed for {} lagged by {} events, resyncing", conversation_id, n);
                    break;
                }
                Err(StreamError::Closed) => {
                    warn!("Typing feed for {} closed, resubscribing", conversation_id);
                    backoff.wait().await;
                    break;
                }
            }
        }
    }
}

/// Time-aware reader state: the last known flag per user, expired after
/// the debounce window even if no stop-typing write ever arrives.
#[derive(Debug, Clone)]
pub struct TypingView {
    window: Duration,
    entries: HashMap<UserId, (bool, DateTime<Utc>)>,
}

impl TypingView {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Record an event. Anything older than what is already known for the
    /// user is ignored, so replays after a resubscribe cannot resurrect a
    /// cleared flag.
    pub fn apply(&mut self, event: &PresenceEvent) {
        if let Some((_, known)) = self.entries.get(&event.user_id) {
            if *known > event.last_updated {
                return;
            }
        }
        self.entries.insert(event.user_id, (event.is_typing, event.last_updated));
    }

    pub fn is_typing(&self, user_id: UserId, now: DateTime<Utc>) -> bool {
        self.entries
            .get(&user_id)
            .is_some_and(|(typing, at)| *typing && !is_stale(*at, now, self.window))
    }

    pub fn anyone_typing(&self, now: DateTime<Utc>) -> bool {
        self.entries.keys().any(|user_id| self.is_typing(*user_id, now))
    }

    /// The earliest moment a currently-typing entry goes stale.
    pub fn next_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let window = chrono::Duration::from_std(self.window).ok()?;
        self.entries
            .values()
            .filter(|(typing, at)| *typing && !is_stale(*at, now, self.window))
            .map(|(_, at)| *at + window)
            .min()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
