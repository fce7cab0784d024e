use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_types::{
    Backend, ChangeFilter, ConversationId, EventMask, Message, MessageId, Row, StreamError, Table, UserId,
};

use crate::config::CoreConfig;
use crate::error::{ChatError, Result};
use crate::retry::Backoff;
use crate::subscription::Subscription;

/// Position in a conversation's log: the `(created_at, id)` of the last
/// message seen.
pub type Cursor = (DateTime<Utc>, MessageId);

/// Append-only, per-conversation ordered message log.
#[derive(Clone)]
pub struct MessageStore<B> {
    backend: B,
    config: CoreConfig,
}

enum Start {
    /// Only messages committed after the subscription attaches.
    Live,
    /// Everything after the cursor, `None` meaning the whole log.
    After(Option<Cursor>),
}

impl<B: Backend> MessageStore<B> {
    pub fn new(backend: B, config: CoreConfig) -> Self {
        Self { backend, config }
    }

    /// Local validation, done before any store round-trip.
    pub fn validate(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }
        if content.len() > self.config.max_message_len {
            return Err(ChatError::ContentTooLong {
                len: content.len(),
                max: self.config.max_message_len,
            });
        }
        Ok(())
    }

    pub async fn append(&self, conversation_id: ConversationId, sender_id: UserId, content: &str) -> Result<Message> {
        self.validate(content)?;

        if !self.backend.is_participant(conversation_id, sender_id).await? {
            return Err(ChatError::NotAParticipant {
                conversation_id,
                user_id: sender_id,
            });
        }

        Ok(self.backend.insert_message(conversation_id, sender_id, content).await?)
    }

    /// Full log, ascending by `(created_at, id)`.
    pub async fn history(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        Ok(self.backend.messages(conversation_id).await?)
    }

    /// Messages appended from now on, in append order.
    pub fn subscribe(&self, conversation_id: ConversationId) -> Subscription<Message> {
        self.spawn_pump(conversation_id, Start::Live)
    }

    /// Every message after `cursor`, then live appends. Pass the last
    /// message of a history snapshot to close the gap between the snapshot
    /// and the subscription.
    pub fn subscribe_after(&self, conversation_id: ConversationId, cursor: Option<Cursor>) -> Subscription<Message> {
        self.spawn_pump(conversation_id, Start::After(cursor))
    }

    fn spawn_pump(&self, conversation_id: ConversationId, start: Start) -> Subscription<Message> {
        let (tx, rx) = mpsc::channel(self.config.subscription_buffer.max(1));
        let backoff = Backoff::new(self.config.retry_base, self.config.retry_max);
        let pump = tokio::spawn(pump_messages(self.backend.clone(), conversation_id, start, tx, backoff));
        Subscription::new(conversation_id, rx, pump)
    }
}

fn is_after(message: &Message, cursor: Option<Cursor>) -> bool {
    cursor.is_none_or(|c| message.order_key() > c)
}

/// Forward inserts for one conversation. Every (re)attach is followed by a
/// catch-up read so lagged or dropped feeds lose nothing; the cursor keeps
/// a message from being forwarded twice by the same pump.
async fn pump_messages<B: Backend>(
    backend: B,
    conversation_id: ConversationId,
    start: Start,
    tx: mpsc::Sender<Message>,
    mut backoff: Backoff,
) {
    let filter = ChangeFilter::table(Table::Messages)
        .events(EventMask::INSERT)
        .eq("conversation_id", conversation_id);

    let mut cursor = match start {
        Start::After(cursor) => cursor,
        Start::Live => loop {
            // Pin "now" to the current tail; the catch-up below replays
            // whatever lands between this read and the attach.
            match backend.messages(conversation_id).await {
                Ok(stored) => break stored.last().map(Message::order_key),
                Err(e) => {
                    warn!("Tail read for {} failed: {}", conversation_id, e);
                    backoff.wait().await;
                }
            }
        },
    };

    loop {
        let mut stream = match backend.subscribe(filter.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Message feed for {} unavailable: {}", conversation_id, e);
                backoff.wait().await;
                continue;
            }
        };

        match backend.messages(conversation_id).await {
            Ok(stored) => {
                for message in stored {
                    if !is_after(&message, cursor) {
                        continue;
                    }
                    cursor = Some(message.order_key());
                    if tx.send(message).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Catch-up read for {} failed: {}", conversation_id, e);
                backoff.wait().await;
                continue;
            }
        }

        loop {
            match stream.recv().await {
                Ok(change) => {
                    let Some(Row::Message(message)) = change.new else {
                        continue;
                    };
                    backoff.reset();
                    if !is_after(&message, cursor) {
                        debug!("Skipping already forwarded message {}", message.id);
                        continue;
                    }
                    cursor = Some(message.order_key());
                    if tx.send(message).await.is_err() {
                        return;
                    }
                }
                Err(StreamError::Lagged(n)) => {
                    warn!("Message feed for {} lagged by {} events, catching up", conversation_id, n);
                    break;
                }
                Err(StreamError::Closed) => {
                    warn!("Message feed for {} closed, resubscribing", conversation_id);
                    backoff.wait().await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message_at(secs: i64, id: Uuid) -> Message {
        Message {
            id,
            conversation_id: Uuid::nil(),
            user_id: Uuid::nil(),
            content: "x".into(),
            created_at: DateTime::from_timestamp(secs, 0).unwrap(),
        }
    }

    #[test]
    fn cursor_orders_by_time_then_id() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let cursor = Some(message_at(10, low).order_key());

        assert!(is_after(&message_at(11, low), cursor));
        assert!(is_after(&message_at(10, high), cursor));
        assert!(!is_after(&message_at(10, low), cursor));
        assert!(!is_after(&message_at(9, high), cursor));
        assert!(is_after(&message_at(0, low), None));
    }
}
